//! Building the ordered stage list from configuration

use burn::prelude::*;

use crate::config::{CascadeConfig, ResolvedStage, StageConfig};
use crate::error::ConfigError;
use crate::stage::StageModel;

/// Ordered stages of a cascade
pub type StageList<B> = Vec<Box<dyn StageModel<B>>>;

/// Instantiates a stage from its configuration
pub trait StageFactory<B: Backend> {
    fn build(
        &self,
        stage: &ResolvedStage,
        device: &B::Device,
    ) -> Result<Box<dyn StageModel<B>>, ConfigError>;
}

impl<B, F> StageFactory<B> for F
where
    B: Backend,
    F: Fn(&ResolvedStage, &B::Device) -> Result<Box<dyn StageModel<B>>, ConfigError>,
{
    fn build(
        &self,
        stage: &ResolvedStage,
        device: &B::Device,
    ) -> Result<Box<dyn StageModel<B>>, ConfigError> {
        self(stage, device)
    }
}

/// Resolves, validates and instantiates every stage in cascade order
pub fn build_stages<B: Backend>(
    config: &CascadeConfig,
    factory: &dyn StageFactory<B>,
    device: &B::Device,
) -> Result<StageList<B>, ConfigError> {
    let resolved = config.resolve_stages()?;
    validate_stages(resolved.iter().map(|s| &s.config))?;

    let mut stages: StageList<B> = Vec::with_capacity(resolved.len());
    for stage in &resolved {
        tracing::debug!(
            stage = stage.index,
            source = %stage.source,
            image_size = stage.config.image_size(),
            "Building stage"
        );
        stages.push(factory.build(stage, device)?);
    }

    tracing::info!(stages = stages.len(), "Built diffusion cascade");
    Ok(stages)
}

/// Checks the cross-stage invariants of a cascade
///
/// The first stage has no previous output to condition on, so it must not
/// be a super-resolution stage. Later stages that ignore the previous output,
/// or expect it at a different size than it is produced, are allowed but
/// logged.
pub fn validate_stages<'a>(
    stages: impl IntoIterator<Item = &'a StageConfig>,
) -> Result<(), ConfigError> {
    let mut previous: Option<&StageConfig> = None;
    let mut count = 0;

    for (i, stage) in stages.into_iter().enumerate() {
        let index = i + 1;
        count = index;
        stage.validate(index)?;

        match (previous, stage.conditioning()) {
            (None, Some(sr)) => {
                return Err(ConfigError::InvalidStage {
                    stage: index,
                    reason: format!(
                        "first stage is conditioned on `{}` but has no previous stage",
                        sr.conditioning_key
                    ),
                });
            }
            (Some(_), None) => {
                tracing::warn!(
                    stage = index,
                    "Stage has no super_resolution block; previous output is not routed"
                );
            }
            (Some(prev), Some(sr)) if sr.low_resolution_size != prev.image_size() => {
                tracing::warn!(
                    stage = index,
                    expected = sr.low_resolution_size,
                    produced = prev.image_size(),
                    "Low-resolution size differs from the previous stage's output size"
                );
            }
            _ => {}
        }

        previous = Some(stage);
    }

    if count == 0 {
        return Err(ConfigError::EmptyCascade);
    }
    Ok(())
}

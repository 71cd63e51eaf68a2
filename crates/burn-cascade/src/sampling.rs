//! Sequential sampling through the cascade

use burn::prelude::*;

use crate::context::Context;
use crate::error::CascadeError;
use crate::router::sampling_context;
use crate::stage::{GuidanceFn, StageModel, StageSampleRequest};

/// Default number of images generated per call
pub const DEFAULT_NUM_SAMPLES: usize = 16;

/// Sampler requested by name for the whole cascade
///
/// Stages always sample with their own configured sampler, so an override
/// is rejected before any stage runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerOverride(String);

impl SamplerOverride {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Configuration for cascade sampling
#[derive(Clone)]
pub struct CascadeSampleConfig<B: Backend> {
    pub num_samples: usize,
    /// Forwarded unchanged to every stage
    pub guidance_fn: Option<GuidanceFn<B>>,
    /// Forwarded unchanged to every stage
    pub classifier_free_guidance: Option<f64>,
    /// Unsupported; must be `None`
    pub sampler: Option<SamplerOverride>,
    /// Unsupported; must be `None`
    pub initial_noise: Option<Tensor<B, 4>>,
}

impl<B: Backend> Default for CascadeSampleConfig<B> {
    fn default() -> Self {
        Self {
            num_samples: DEFAULT_NUM_SAMPLES,
            guidance_fn: None,
            classifier_free_guidance: None,
            sampler: None,
            initial_noise: None,
        }
    }
}

impl<B: Backend> CascadeSampleConfig<B> {
    pub fn new(num_samples: usize) -> Self {
        Self {
            num_samples,
            ..Default::default()
        }
    }

    pub fn with_guidance_fn(mut self, guidance_fn: GuidanceFn<B>) -> Self {
        self.guidance_fn = Some(guidance_fn);
        self
    }

    pub fn with_classifier_free_guidance(mut self, scale: f64) -> Self {
        self.classifier_free_guidance = Some(scale);
        self
    }

    pub fn with_sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler = Some(SamplerOverride::new(sampler));
        self
    }

    pub fn with_initial_noise(mut self, noise: Tensor<B, 4>) -> Self {
        self.initial_noise = Some(noise);
        self
    }

    fn check_supported(&self) -> Result<(), CascadeError> {
        if self.initial_noise.is_some() {
            return Err(CascadeError::Unsupported(
                "initial noise cannot be supplied to cascade sampling",
            ));
        }
        if let Some(sampler) = &self.sampler {
            tracing::warn!(
                sampler = sampler.name(),
                "Rejecting cascade-level sampler override"
            );
            return Err(CascadeError::Unsupported(
                "sampler override cannot be supplied to cascade sampling",
            ));
        }
        Ok(())
    }
}

/// Result of sampling the whole cascade
#[derive(Debug, Clone)]
pub struct CascadeSample<B: Backend> {
    /// Output of the final, highest-resolution stage
    pub images: Tensor<B, 4>,
    /// Output of every stage, in cascade order
    pub stage_outputs: Vec<Tensor<B, 4>>,
}

/// Runs each stage in turn, feeding its output to the next
pub struct SamplingPipeline<'a, B: Backend> {
    stages: &'a [Box<dyn StageModel<B>>],
}

impl<'a, B: Backend> SamplingPipeline<'a, B> {
    pub fn new(stages: &'a [Box<dyn StageModel<B>>]) -> Self {
        Self { stages }
    }

    pub fn sample(
        &self,
        context: Option<&Context<B>>,
        config: &CascadeSampleConfig<B>,
    ) -> Result<CascadeSample<B>, CascadeError> {
        config.check_supported()?;

        let mut stage_outputs: Vec<Tensor<B, 4>> = Vec::with_capacity(self.stages.len());

        for (i, stage) in self.stages.iter().enumerate() {
            let index = i + 1;
            let context_for_layer = sampling_context(stage.config(), context, stage_outputs.last());

            tracing::debug!(
                stage = index,
                num_samples = config.num_samples,
                "Sampling stage"
            );
            let sample = stage
                .sample(StageSampleRequest {
                    context: context_for_layer,
                    num_samples: config.num_samples,
                    guidance_fn: config.guidance_fn.clone(),
                    classifier_free_guidance: config.classifier_free_guidance,
                })
                .map_err(|source| CascadeError::Stage {
                    stage: index,
                    source,
                })?;

            tracing::debug!(stage = index, dims = ?sample.images.dims(), "Stage sampled");
            stage_outputs.push(sample.images);
        }

        let images = stage_outputs
            .last()
            .cloned()
            .ok_or(CascadeError::EmptyCascade)?;
        Ok(CascadeSample {
            images,
            stage_outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use crate::config::StageConfig;
    use crate::registry::StageList;
    use crate::stage::{LossOutput, StageError, StageSample};
    use crate::testing::{CallLog, MockStage, TestBackend};

    fn two_stage(log: &CallLog) -> StageList<TestBackend> {
        let upsampler = StageConfig::new(256).with_super_resolution("low_res", 64);
        vec![
            Box::new(MockStage::new(StageConfig::new(64), 1.0).with_log(log.clone())),
            Box::new(MockStage::new(upsampler, 2.0).with_log(log.clone())),
        ]
    }

    #[test]
    fn test_sample_routes_previous_output() {
        let log = CallLog::default();
        let stages = two_stage(&log);

        let sample = SamplingPipeline::new(&stages)
            .sample(None, &CascadeSampleConfig::new(2))
            .unwrap();

        assert_eq!(sample.stage_outputs.len(), 2);
        assert_eq!(sample.stage_outputs[0].dims(), [2, 3, 64, 64]);
        assert_eq!(sample.images.dims(), [2, 3, 256, 256]);
        let last = sample.stage_outputs[1].clone();
        assert!(sample.images.clone().equal(last).all().into_scalar());

        let calls = log.borrow();
        let order: Vec<f32> = calls.iter().map(|c| c.stage_id).collect();
        assert_eq!(order, vec![1.0, 2.0]);
        assert!(calls[0].conditioning.is_none());
        let routed = calls[1].conditioning.clone().unwrap();
        let first = sample.stage_outputs[0].clone();
        assert!(routed.equal(first).all().into_scalar());
        assert_eq!(calls[1].num_samples, Some(2));
    }

    #[test]
    fn test_default_num_samples() {
        let log = CallLog::default();
        let stages = two_stage(&log);

        let sample = SamplingPipeline::new(&stages)
            .sample(None, &CascadeSampleConfig::default())
            .unwrap();

        assert_eq!(sample.images.dims()[0], DEFAULT_NUM_SAMPLES);
    }

    #[test]
    fn test_base_context_is_shared_not_mutated() {
        let log = CallLog::default();
        let stages = two_stage(&log);
        let base = Context::new().with("class_label", 7.0_f64);

        SamplingPipeline::new(&stages)
            .sample(Some(&base), &CascadeSampleConfig::new(1))
            .unwrap();

        let calls = log.borrow();
        assert_eq!(calls[0].context_keys, vec!["class_label"]);
        assert_eq!(calls[1].context_keys, vec!["class_label", "low_res"]);
        assert_eq!(base.keys(), vec!["class_label"]);
    }

    #[test]
    fn test_initial_noise_rejected_before_any_stage() {
        let log = CallLog::default();
        let stages = two_stage(&log);
        let device = Default::default();
        let config = CascadeSampleConfig::new(1)
            .with_initial_noise(Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &device));

        let err = SamplingPipeline::new(&stages)
            .sample(None, &config)
            .unwrap_err();

        assert!(matches!(err, CascadeError::Unsupported(_)));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_sampler_override_rejected() {
        let log = CallLog::default();
        let stages = two_stage(&log);
        let config = CascadeSampleConfig::new(1).with_sampler("ddim");
        let sampler = config.sampler.as_ref().map(SamplerOverride::name);
        assert_eq!(sampler, Some("ddim"));

        let err = SamplingPipeline::new(&stages)
            .sample(None, &config)
            .unwrap_err();

        assert!(matches!(err, CascadeError::Unsupported(_)));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_guidance_forwarded() {
        struct GuidedStage {
            config: StageConfig,
            seen: Rc<RefCell<Vec<(bool, Option<f64>)>>>,
        }

        impl StageModel<TestBackend> for GuidedStage {
            fn config(&self) -> &StageConfig {
                &self.config
            }
            fn loss(
                &self,
                _images: Tensor<TestBackend, 4>,
                _context: Context<TestBackend>,
            ) -> Result<LossOutput<TestBackend>, StageError> {
                Err(StageError::Failed("not used".into()))
            }
            fn sample(
                &self,
                request: StageSampleRequest<TestBackend>,
            ) -> Result<StageSample<TestBackend>, StageError> {
                self.seen.borrow_mut().push((
                    request.guidance_fn.is_some(),
                    request.classifier_free_guidance,
                ));
                let size = self.config.image_size();
                Ok(StageSample::new(Tensor::zeros(
                    [request.num_samples, 3, size, size],
                    &Default::default(),
                )))
            }
            fn num_params(&self) -> usize {
                0
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let stages: StageList<TestBackend> = vec![Box::new(GuidedStage {
            config: StageConfig::new(16),
            seen: seen.clone(),
        })];
        let double = |x: Tensor<TestBackend, 4>, _step: usize| x * 2.0;
        let guidance: GuidanceFn<TestBackend> = Arc::new(double);
        let config = CascadeSampleConfig::new(1)
            .with_guidance_fn(guidance)
            .with_classifier_free_guidance(3.0);

        SamplingPipeline::new(&stages)
            .sample(None, &config)
            .unwrap();
        assert_eq!(seen.borrow().as_slice(), &[(true, Some(3.0))]);
    }

    #[test]
    fn test_empty_stage_list() {
        let stages: StageList<TestBackend> = Vec::new();
        let err = SamplingPipeline::new(&stages)
            .sample(None, &CascadeSampleConfig::new(1))
            .unwrap_err();
        assert!(matches!(err, CascadeError::EmptyCascade));
    }
}

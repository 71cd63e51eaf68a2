//! The cascade facade
//!
//! [`DiffusionCascade`] owns the ordered stage list and exposes the joint
//! training loss, sequential sampling and the per-stage lifecycle
//! operations a training driver needs.

use std::path::Path;

use burn::prelude::*;

use crate::config::CascadeConfig;
use crate::context::Context;
use crate::diagnostics::{MemoryDiagnostics, TracingDiagnostics};
use crate::error::{CascadeError, ConfigError};
use crate::loss::LossAggregator;
use crate::optim::{LrScheduleConfig, StageOptimizer};
use crate::registry::{build_stages, validate_stages, StageFactory, StageList};
use crate::sampling::{CascadeSample, CascadeSampleConfig, SamplingPipeline};
use crate::stage::{LossOutput, StageModel};

/// A cascade of diffusion models at increasing resolution
pub struct DiffusionCascade<B: Backend> {
    config: CascadeConfig,
    stages: StageList<B>,
    diagnostics: Box<dyn MemoryDiagnostics>,
}

impl<B: Backend> DiffusionCascade<B> {
    /// Builds every stage described by `config`
    pub fn new(
        config: CascadeConfig,
        factory: &dyn StageFactory<B>,
        device: &B::Device,
    ) -> Result<Self, ConfigError> {
        let stages = build_stages(&config, factory, device)?;
        Ok(Self {
            config,
            stages,
            diagnostics: Box::new(TracingDiagnostics),
        })
    }

    /// Loads a cascade document and builds its stages
    pub fn from_file(
        path: impl AsRef<Path>,
        factory: &dyn StageFactory<B>,
        device: &B::Device,
    ) -> Result<Self, ConfigError> {
        let config = CascadeConfig::from_file(path)?;
        Self::new(config, factory, device)
    }

    /// Wraps already constructed stages, in cascade order
    pub fn from_stages(stages: StageList<B>) -> Result<Self, ConfigError> {
        validate_stages(stages.iter().map(|s| s.config()))?;
        let config = CascadeConfig::from_stages(stages.iter().map(|s| s.config().clone()));
        Ok(Self {
            config,
            stages,
            diagnostics: Box::new(TracingDiagnostics),
        })
    }

    /// Replaces the out-of-memory diagnostics hook
    pub fn with_diagnostics(mut self, diagnostics: impl MemoryDiagnostics + 'static) -> Self {
        self.diagnostics = Box::new(diagnostics);
        self
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    pub fn stages(&self) -> &[Box<dyn StageModel<B>>] {
        &self.stages
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Total trainable parameters across all stages
    pub fn num_params(&self) -> usize {
        self.stages.iter().map(|s| s.num_params()).sum()
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Diffusion cascade: {} stages, {} parameters",
            self.num_stages(),
            self.num_params()
        )];
        for (i, stage) in self.stages.iter().enumerate() {
            lines.push(format!("  Stage {}: {}", i + 1, stage.summary()));
        }
        lines.join("\n")
    }

    /// Prints a header, then each stage's own summary
    pub fn print_summary(&self) {
        println!(
            "Diffusion cascade: {} stages, {} parameters",
            self.num_stages(),
            self.num_params()
        );
        for (i, stage) in self.stages.iter().enumerate() {
            print!("  Stage {}: ", i + 1);
            stage.print_summary();
        }
    }

    /// One Adam optimizer per stage, in cascade order
    pub fn configure_optimizers(&self, learning_rate: f64) -> Vec<StageOptimizer> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, stage)| StageOptimizer::new(i + 1, learning_rate, stage.num_params()))
            .collect()
    }

    /// Asks each stage for the schedule of its optimizer
    pub fn configure_lr_schedules(&self, optimizers: &[StageOptimizer]) -> Vec<LrScheduleConfig> {
        if optimizers.len() != self.stages.len() {
            tracing::warn!(
                optimizers = optimizers.len(),
                stages = self.stages.len(),
                "Optimizer count does not match stage count; extra entries are ignored"
            );
        }
        self.stages
            .iter()
            .zip(optimizers)
            .map(|(stage, optimizer)| stage.configure_lr_schedule(optimizer))
            .collect()
    }

    /// Joint training loss on a full-resolution batch
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
        context: &Context<B>,
    ) -> Result<LossOutput<B>, CascadeError> {
        LossAggregator::new(&self.stages, self.diagnostics.as_ref()).forward(images, context)
    }

    /// Per-stage loss entry point; train through [`forward`](Self::forward)
    pub fn loss_on_batch(
        &self,
        _images: Tensor<B, 4>,
        _context: &Context<B>,
    ) -> Result<LossOutput<B>, CascadeError> {
        Err(CascadeError::Unsupported("loss_on_batch; use forward to train the whole cascade"))
    }

    /// Samples every stage in order, routing each output to the next
    pub fn sample(
        &self,
        context: Option<&Context<B>>,
        config: &CascadeSampleConfig<B>,
    ) -> Result<CascadeSample<B>, CascadeError> {
        SamplingPipeline::new(&self.stages).sample(context, config)
    }

    /// Whole-cascade checkpoints are not supported; load each stage instead
    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<(), CascadeError> {
        tracing::warn!(path = %path.as_ref().display(), "Cascade checkpoint loading requested");
        Err(CascadeError::Unsupported("loading a checkpoint for the whole cascade"))
    }

    /// No-op: stages keep their own EMA weights
    pub fn update_ema(&mut self, step: usize, total_steps: usize) {
        tracing::trace!(step, total_steps, "Cascade EMA update skipped");
    }
}

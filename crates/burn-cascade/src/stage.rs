//! The contract every diffusion stage fulfils
//!
//! The cascade never looks inside a stage: it hands each one correctly
//! sized images plus a routed [`Context`], and reads back a loss or a
//! generated batch. Network design, noise schedule and the reverse-process
//! sampler all live behind [`StageModel`].

use std::collections::BTreeMap;
use std::sync::Arc;

use burn::prelude::*;
use thiserror::Error;

use crate::config::StageConfig;
use crate::context::Context;
use crate::optim::{LrScheduleConfig, StageOptimizer};

/// Key of the training loss in a [`LossOutput`]
pub const LOSS_KEY: &str = "loss";

/// Failures reported by a stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Out of device memory: {0}")]
    OutOfMemory(String),

    #[error("Missing context entry: {0}")]
    MissingContext(String),

    #[error("Loss output has no `loss` entry")]
    MissingLoss,

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("{0}")]
    Failed(String),
}

impl StageError {
    /// Whether the failure was device memory exhaustion
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, StageError::OutOfMemory(_))
    }
}

/// Named scalar losses produced by a training step
#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    entries: BTreeMap<String, Tensor<B, 1>>,
}

impl<B: Backend> LossOutput<B> {
    /// Output holding only the training loss
    pub fn new(loss: Tensor<B, 1>) -> Self {
        Self::empty().with_entry(LOSS_KEY, loss)
    }

    /// Output with no entries
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Adds an auxiliary entry (e.g. a per-term breakdown)
    pub fn with_entry(mut self, key: impl Into<String>, value: Tensor<B, 1>) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Tensor<B, 1>> {
        self.entries.get(key)
    }

    /// The training loss, if present
    pub fn loss(&self) -> Option<&Tensor<B, 1>> {
        self.get(LOSS_KEY)
    }

    /// Consumes the output and returns the training loss
    pub fn into_loss(mut self) -> Result<Tensor<B, 1>, StageError> {
        self.entries.remove(LOSS_KEY).ok_or(StageError::MissingLoss)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Guidance callback applied by a stage's sampler
///
/// Receives the current estimate and the step index and returns the guided
/// estimate.
pub type GuidanceFn<B> = Arc<dyn Fn(Tensor<B, 4>, usize) -> Tensor<B, 4> + Send + Sync>;

/// Arguments for a single stage's sampling call
#[derive(Clone)]
pub struct StageSampleRequest<B: Backend> {
    pub context: Context<B>,
    pub num_samples: usize,
    pub guidance_fn: Option<GuidanceFn<B>>,
    pub classifier_free_guidance: Option<f64>,
}

/// Batch generated by a stage, plus optional intermediate states
#[derive(Debug, Clone)]
pub struct StageSample<B: Backend> {
    pub images: Tensor<B, 4>,
    pub intermediates: Option<Vec<Tensor<B, 4>>>,
}

impl<B: Backend> StageSample<B> {
    pub fn new(images: Tensor<B, 4>) -> Self {
        Self {
            images,
            intermediates: None,
        }
    }
}

/// A single diffusion model in a cascade
pub trait StageModel<B: Backend> {
    /// Configuration the stage was built from
    fn config(&self) -> &StageConfig;

    /// Training loss on a batch already sized to `config().image_size()`
    fn loss(&self, images: Tensor<B, 4>, context: Context<B>) -> Result<LossOutput<B>, StageError>;

    /// Generates `request.num_samples` images at the stage's resolution
    fn sample(&self, request: StageSampleRequest<B>) -> Result<StageSample<B>, StageError>;

    /// Number of trainable parameters
    fn num_params(&self) -> usize;

    /// One-line description used by summaries
    fn summary(&self) -> String {
        let config = self.config();
        let conditioning = match config.conditioning() {
            Some(sr) => format!(
                ", conditioned on `{}` at {}x{}",
                sr.conditioning_key, sr.low_resolution_size, sr.low_resolution_size
            ),
            None => String::new(),
        };
        format!(
            "{}x{}x{}{}, {} parameters",
            config.data.num_channels,
            config.image_size(),
            config.image_size(),
            conditioning,
            self.num_params()
        )
    }

    /// Prints the stage summary to stdout
    fn print_summary(&self) {
        println!("{}", self.summary());
    }

    /// Learning rate schedule for this stage's optimizer
    ///
    /// Stages without their own schedule keep the optimizer's rate.
    fn configure_lr_schedule(&self, optimizer: &StageOptimizer) -> LrScheduleConfig {
        LrScheduleConfig::Constant {
            learning_rate: optimizer.learning_rate,
        }
    }
}

/// Tensor shape check shared by stage implementations
pub fn expect_dims<B: Backend, const D: usize>(
    tensor: &Tensor<B, D>,
    expected: [usize; D],
) -> Result<(), StageError> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(StageError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}

//! burn-cascade: Cascaded Diffusion Models for Burn
//!
//! Orchestrates a chain of diffusion models, each generating at a higher
//! resolution than the last. The output of one stage becomes the
//! low-resolution conditioning of the next.
//!
//! - Training: every stage computes its loss on the input batch resized to
//!   its own resolution, and the losses are summed.
//! - Sampling: stages run in order and each one is conditioned on the
//!   previous stage's output.
//!
//! Individual stages are opaque [`StageModel`]s built by a [`StageFactory`]
//! from per-stage configuration.
//!
//! # Configuration
//!
//! ```yaml
//! diffusion_cascade:
//!   cascade_layer_1:
//!     config: base_64.yaml
//!   cascade_layer_2:
//!     config: upsampler_256.yaml
//! ```
//!
//! where a super-resolution stage declares its conditioning:
//!
//! ```yaml
//! data:
//!   image_size: 256
//! super_resolution:
//!   conditioning_key: low_res
//!   low_resolution_size: 64
//! ```
//!
//! # Example
//!
//! ```ignore
//! use burn_cascade::{CascadeSampleConfig, Context, DiffusionCascade};
//! use burn_cascade::backends::{default_device, DefaultBackend};
//!
//! let device = default_device();
//! let cascade = DiffusionCascade::<DefaultBackend>::from_file("cascade.yaml", &factory, &device)?;
//!
//! let losses = cascade.forward(images, &Context::new())?;
//! let sample = cascade.sample(None, &CascadeSampleConfig::new(4))?;
//! ```

pub mod backends;
pub mod cascade;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod loss;
pub mod optim;
pub mod registry;
pub mod resize;
pub mod router;
pub mod sampling;
pub mod stage;

#[cfg(test)]
pub(crate) mod testing;

pub use cascade::DiffusionCascade;
pub use config::{
    CascadeConfig, DataConfig, ResolvedStage, StageConfig, StageEntry, StageSource,
    SuperResolutionConfig,
};
pub use context::{Context, ContextValue};
pub use diagnostics::{MemoryDiagnostics, TensorReport, TracingDiagnostics};
pub use error::{CascadeError, ConfigError};
pub use loss::LossAggregator;
pub use optim::{LrScheduleConfig, StageOptimizer};
pub use registry::{build_stages, validate_stages, StageFactory, StageList};
pub use sampling::{CascadeSample, CascadeSampleConfig, SamplerOverride, SamplingPipeline};
pub use stage::{GuidanceFn, LossOutput, StageError, StageModel, StageSample, StageSampleRequest};

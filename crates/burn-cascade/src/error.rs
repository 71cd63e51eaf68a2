//! Error types for cascade construction and execution

use std::path::PathBuf;

use thiserror::Error;

use crate::stage::StageError;

/// Errors raised while loading or validating cascade configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error in {origin}: {source}")]
    Yaml {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Cascade defines no stages (expected `cascade_layer_1`)")]
    EmptyCascade,

    #[error("Stage `{key}` is not reachable: `cascade_layer_{missing}` is missing")]
    StageGap { key: String, missing: usize },

    #[error("Unrecognized stage key `{0}` (expected `cascade_layer_<n>`)")]
    UnknownStageKey(String),

    #[error("Invalid configuration for stage {stage}: {reason}")]
    InvalidStage { stage: usize, reason: String },

    #[error("Failed to build stage {stage}: {message}")]
    Factory { stage: usize, message: String },
}

/// Errors raised by cascade-level operations
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: usize,
        #[source]
        source: StageError,
    },

    #[error("Cascade has no stages")]
    EmptyCascade,
}

impl CascadeError {
    /// Whether this error came from a stage running out of device memory
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, CascadeError::Stage { source, .. } if source.is_out_of_memory())
    }

    /// The underlying stage failure, if any
    pub fn stage_error(&self) -> Option<(usize, &StageError)> {
        match self {
            CascadeError::Stage { stage, source } => Some((*stage, source)),
            _ => None,
        }
    }
}

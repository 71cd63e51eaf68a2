//! Per-stage optimizer and learning rate schedule configuration
//!
//! Each stage trains with its own Adam optimizer. The cascade only decides
//! the hyperparameters; the stage-level training driver initializes the
//! optimizer against its concrete module with [`AdamConfig::init`].

use burn::optim::AdamConfig;
use serde::Serialize;

/// Adam first moment decay used for every stage
pub const ADAM_BETA_1: f32 = 0.9;
/// Adam second moment decay used for every stage
pub const ADAM_BETA_2: f32 = 0.99;

/// Optimizer settings for one stage
#[derive(Debug, Clone)]
pub struct StageOptimizer {
    /// 1-based stage position
    pub stage: usize,
    pub learning_rate: f64,
    /// Adam `(beta_1, beta_2)`
    pub betas: (f32, f32),
    pub adam: AdamConfig,
    /// Parameter count of the stage the optimizer will drive
    pub num_params: usize,
}

impl StageOptimizer {
    pub fn new(stage: usize, learning_rate: f64, num_params: usize) -> Self {
        Self {
            stage,
            learning_rate,
            betas: (ADAM_BETA_1, ADAM_BETA_2),
            adam: AdamConfig::new()
                .with_beta_1(ADAM_BETA_1)
                .with_beta_2(ADAM_BETA_2),
            num_params,
        }
    }
}

/// Learning rate schedule chosen by a stage
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LrScheduleConfig {
    /// Fixed rate
    Constant { learning_rate: f64 },
    /// Linear ramp from 0 to `learning_rate` over `warmup_steps`, then fixed
    LinearWarmup {
        learning_rate: f64,
        warmup_steps: usize,
    },
    /// Cosine decay from `learning_rate` to `min_learning_rate`
    Cosine {
        learning_rate: f64,
        min_learning_rate: f64,
        total_steps: usize,
    },
}

impl LrScheduleConfig {
    /// Learning rate at a 0-based optimizer step
    pub fn learning_rate_at(&self, step: usize) -> f64 {
        match *self {
            LrScheduleConfig::Constant { learning_rate } => learning_rate,
            LrScheduleConfig::LinearWarmup {
                learning_rate,
                warmup_steps,
            } => {
                if warmup_steps == 0 || step >= warmup_steps {
                    learning_rate
                } else {
                    learning_rate * (step + 1) as f64 / warmup_steps as f64
                }
            }
            LrScheduleConfig::Cosine {
                learning_rate,
                min_learning_rate,
                total_steps,
            } => {
                if total_steps == 0 || step >= total_steps {
                    return min_learning_rate;
                }
                let progress = step as f64 / total_steps as f64;
                let cosine = 0.5 * (1.0 + (std::f64::consts::PI * progress).cos());
                min_learning_rate + (learning_rate - min_learning_rate) * cosine
            }
        }
    }
}

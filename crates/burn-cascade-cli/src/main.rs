//! burn-cascade CLI
//!
//! Inspects cascade configuration without loading any model weights:
//! - `inspect`: list the stages a cascade document resolves to
//! - `plan`: show how images and conditioning flow between stages

use anyhow::{Context, Result};
use burn_cascade::{validate_stages, CascadeConfig, ResolvedStage};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "burn-cascade")]
#[command(about = "Inspect and validate cascaded diffusion configurations")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a cascade, listing its stages
    Inspect {
        /// Cascade configuration (YAML)
        config: PathBuf,
    },

    /// Show the per-stage resize and conditioning plan
    Plan {
        /// Cascade configuration (YAML)
        config: PathBuf,

        /// Side length of the training batches fed to the cascade
        #[arg(long)]
        input_size: usize,
    },
}

/// One resolved stage, as listed by `inspect`
#[derive(Debug, Serialize)]
struct StageInfo {
    index: usize,
    source: String,
    image_size: usize,
    num_channels: usize,
    conditioning_key: Option<String>,
    low_resolution_size: Option<usize>,
}

impl From<&ResolvedStage> for StageInfo {
    fn from(stage: &ResolvedStage) -> Self {
        let sr = stage.config.conditioning();
        Self {
            index: stage.index,
            source: stage.source.to_string(),
            image_size: stage.config.image_size(),
            num_channels: stage.config.data.num_channels,
            conditioning_key: sr.map(|sr| sr.conditioning_key.clone()),
            low_resolution_size: sr.map(|sr| sr.low_resolution_size),
        }
    }
}

/// How one stage is fed during training and sampling
#[derive(Debug, PartialEq, Serialize)]
struct StagePlan {
    index: usize,
    image_size: usize,
    /// Whether the training batch is resized before reaching the stage
    training_resize: bool,
    /// Size of the low-resolution conditioning derived from the training batch
    training_conditioning: Option<usize>,
    /// Key the previous stage's output is routed under when sampling
    sampling_key: Option<String>,
    /// Size of the previous stage's output, as routed (never resized)
    sampling_conditioning: Option<usize>,
    /// The declared low-resolution size differs from what is routed
    size_mismatch: bool,
}

fn plan_stages(stages: &[ResolvedStage], input_size: usize) -> Vec<StagePlan> {
    let mut previous_size: Option<usize> = None;
    let mut plans = Vec::with_capacity(stages.len());

    for stage in stages {
        let image_size = stage.config.image_size();
        let sr = stage.config.conditioning();
        let sampling_conditioning = sr.and(previous_size);

        plans.push(StagePlan {
            index: stage.index,
            image_size,
            training_resize: image_size != input_size,
            training_conditioning: sr.map(|sr| sr.low_resolution_size),
            sampling_key: sr.map(|sr| sr.conditioning_key.clone()),
            sampling_conditioning,
            size_mismatch: match (sr, sampling_conditioning) {
                (Some(sr), Some(routed)) => sr.low_resolution_size != routed,
                _ => false,
            },
        });
        previous_size = Some(image_size);
    }

    plans
}

fn load_stages(path: &Path) -> Result<Vec<ResolvedStage>> {
    let config = CascadeConfig::from_file(path)
        .with_context(|| format!("Failed to load cascade config {}", path.display()))?;
    let stages = config
        .resolve_stages()
        .with_context(|| format!("Failed to resolve stages of {}", path.display()))?;
    validate_stages(stages.iter().map(|s| &s.config)).context("Invalid cascade")?;
    tracing::info!(stages = stages.len(), "Loaded cascade configuration");
    Ok(stages)
}

fn run_inspect(config: &Path, json: bool) -> Result<()> {
    let stages = load_stages(config)?;
    let infos: Vec<StageInfo> = stages.iter().map(StageInfo::from).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    println!("Cascade: {} ({} stages)\n", config.display(), infos.len());
    for info in &infos {
        println!("Stage {}:", info.index);
        println!("  Source:     {}", info.source);
        println!(
            "  Image size: {}x{}x{}",
            info.num_channels, info.image_size, info.image_size
        );
        match (&info.conditioning_key, info.low_resolution_size) {
            (Some(key), Some(size)) => println!("  Conditioning: `{key}` at {size}x{size}"),
            _ => println!("  Conditioning: none"),
        }
    }
    Ok(())
}

fn run_plan(config: &Path, input_size: usize, json: bool) -> Result<()> {
    let stages = load_stages(config)?;
    let plans = plan_stages(&stages, input_size);

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    println!("Training input: {}x{}\n", input_size, input_size);
    for plan in &plans {
        println!(
            "Stage {} ({}x{}):",
            plan.index, plan.image_size, plan.image_size
        );
        if plan.training_resize {
            println!("  train:  resize {} -> {}", input_size, plan.image_size);
        } else {
            println!("  train:  input passed through");
        }
        if let Some(size) = plan.training_conditioning {
            println!("  train:  conditioning derived at {}x{}", size, size);
        }
        match (&plan.sampling_key, plan.sampling_conditioning) {
            (Some(key), Some(size)) => {
                println!(
                    "  sample: previous output ({}x{}) routed as `{}`",
                    size, size, key
                );
                if plan.size_mismatch {
                    println!("  [warning] stage declares a different low-resolution size");
                }
            }
            _ => println!("  sample: no conditioning"),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { config } => run_inspect(&config, cli.json),
        Commands::Plan { config, input_size } => run_plan(&config, input_size, cli.json),
    }
}

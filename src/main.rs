//! lidar-forge — production post-processing of airborne LiDAR point clouds.
//!
//! # Usage
//!
//! ```bash
//! # Full building pipeline over one tile or a directory of tiles
//! lidar-forge --task apply_on_building --input tiles/ --output out/
//!
//! # Threshold optimization over a hand-corrected corpus
//! lidar-forge --task optimize_building --input corpus/ --output study/ \
//!     --todo prepare+optimize+evaluate+update
//!
//! # Strip extra dimensions
//! lidar-forge --task cleaning --input tiles/ --output cleaned/
//! ```
//!
//! # Environment Variables
//!
//! - `LIDAR_FORGE_CONFIG`: path to a TOML config file
//! - `RUST_LOG`: logging filter (default: info)

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use lidar_forge::config::AppConfig;
use lidar_forge::optimization::BuildingThresholdOptimizer;
use lidar_forge::pipeline::{run_cleaning, Pipeline};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "lidar-forge")]
#[command(about = "Building validation, completion and identification for LiDAR tiles")]
#[command(version)]
struct CliArgs {
    /// Task to run: apply_on_building, cleaning, optimize_building.
    /// Unknown tasks fall back to apply_on_building with a warning.
    #[arg(long, default_value = "apply_on_building")]
    task: String,

    /// Input LAS/LAZ file, or directory of tiles
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Explicit config file (otherwise LIDAR_FORGE_CONFIG, then
    /// ./lidar_forge.toml, then built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the optimizer phases, e.g. "prepare+optimize"
    #[arg(long)]
    todo: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::load().context("loading config")?,
    };
    if let Some(todo) = &args.todo {
        config.optimization.todo = todo.clone();
    }

    let task = match args.task.as_str() {
        known @ ("apply_on_building" | "cleaning" | "optimize_building") => known,
        unknown => {
            warn!(task = unknown, "unknown task, falling back to apply_on_building");
            "apply_on_building"
        }
    };

    match task {
        "cleaning" => {
            let failures = run_cleaning(&config, &args.input, &args.output)?;
            anyhow::ensure!(failures == 0, "{failures} tile(s) failed cleaning");
        }
        "optimize_building" => {
            let mut optimizer =
                BuildingThresholdOptimizer::new(&config, &args.input, &args.output);
            optimizer.run().context("threshold optimization failed")?;
        }
        _ => {
            let pipeline = Pipeline::new(&config);
            let failures = pipeline.run_path(&args.input, &args.output)?;
            anyhow::ensure!(failures == 0, "{failures} tile(s) failed");
        }
    }

    info!("done");
    Ok(())
}

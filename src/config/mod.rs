//! Application configuration.
//!
//! Every tunable of the pipeline lives in one typed tree loaded from TOML:
//! per-stage thresholds, cluster parameters, dimension names and the
//! classification code mapping, each with explicit defaults.
//!
//! ## Loading order
//!
//! 1. `LIDAR_FORGE_CONFIG` environment variable (path to a TOML file)
//! 2. `./lidar_forge.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Loaded configs are range-checked with [`AppConfig::validate`]; an invalid
//! file is a startup error, not a recoverable condition.

mod app_config;
pub mod defaults;

pub use app_config::*;

//! System-wide default constants.
//!
//! Centralises the fixed names and subpaths shared between the pipeline
//! driver, the optimizer and the tests. Grouped by subsystem.

// ============================================================================
// Configuration loading
// ============================================================================

/// Environment variable pointing at a TOML config file.
pub const CONFIG_ENV_VAR: &str = "LIDAR_FORGE_CONFIG";

/// Config file searched in the working directory when the env var is unset.
pub const CONFIG_FILE_NAME: &str = "lidar_forge.toml";

// ============================================================================
// Optimizer artifacts
// ============================================================================

/// Subdirectory of the optimizer output dir holding prepared tiles.
pub const PREPARED_SUBDIR: &str = "prepared";

/// Subdirectory of the optimizer output dir holding updated tiles.
pub const UPDATED_SUBDIR: &str = "updated";

/// Serialized cluster-information cache (bincode), one flat list per corpus.
pub const GROUP_INFO_FILE: &str = "group_infos.bin";

/// Winning decision thresholds (YAML, eight scalar keys).
pub const THRESHOLDS_FILE: &str = "optimized_thresholds.yaml";

/// Evaluation metrics dump (JSON), written next to the thresholds.
pub const METRICS_FILE: &str = "evaluation_metrics.json";

// ============================================================================
// Point dimensions
// ============================================================================

/// LAS dimensions that always survive cleaning. Everything else is an extra
/// dimension subject to the configured keep-lists.
pub const STANDARD_DIMENSIONS: &[&str] = &[
    "x",
    "y",
    "z",
    "intensity",
    "return_number",
    "number_of_returns",
    "classification",
    "scan_angle",
    "point_source_id",
    "gps_time",
    "red",
    "green",
    "blue",
    "nir",
];

/// True when `name` is not one of the standard LAS dimensions.
pub fn is_extra_dimension(name: &str) -> bool {
    !STANDARD_DIMENSIONS.contains(&name)
}

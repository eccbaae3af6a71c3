//! Typed configuration tree — all pipeline tunables as TOML values.
//!
//! Each struct implements `Default` with the values used by the production
//! deployment, so an absent config file means standard behavior.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cluster::ClusterParams;
use crate::validation::DecisionThresholds;

use super::defaults;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Top-level config
// ============================================================================

/// Root configuration for one application or optimizer run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Dimension names, classification codes, CRS
    #[serde(default)]
    pub data_format: DataFormatConfig,

    /// Stage 1–2: candidate clustering, overlay, cluster decision
    #[serde(default)]
    pub building_validation: ValidationConfig,

    /// Stage 3: extension of confirmed buildings
    #[serde(default)]
    pub building_completion: CompletionConfig,

    /// Stage 4: identification of new building candidates
    #[serde(default)]
    pub building_identification: IdentificationConfig,

    /// Threshold search over a corrected corpus
    #[serde(default)]
    pub optimization: OptimizationConfig,

    /// Driver-level stage toggles
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load configuration using the standard search order:
    /// 1. `LIDAR_FORGE_CONFIG` environment variable
    /// 2. `./lidar_forge.toml`
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), "loaded config from {}", defaults::CONFIG_ENV_VAR);
                return Ok(config);
            }
            warn!(path = %path, "{} points to a non-existent file, falling back", defaults::CONFIG_ENV_VAR);
        }

        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!("loaded config from ./{}", defaults::CONFIG_FILE_NAME);
            return Ok(config);
        }

        info!("no {} found, using built-in defaults", defaults::CONFIG_FILE_NAME);
        Ok(Self::default())
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Range-check every tunable. Called on load; call it again after
    /// programmatic mutation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.building_validation
            .thresholds
            .validate(self.data_format.num_classes)
            .map_err(ConfigError::Invalid)?;

        for (stage, cluster) in [
            ("building_validation", &self.building_validation.cluster),
            ("building_completion", &self.building_completion.cluster),
            ("building_identification", &self.building_identification.cluster),
        ] {
            if cluster.min_points == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{stage}.cluster.min_points must be >= 1"
                )));
            }
            if !(cluster.tolerance > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{stage}.cluster.tolerance must be > 0, got {}",
                    cluster.tolerance
                )));
            }
        }

        for (name, value) in [
            (
                "building_completion.min_building_proba",
                self.building_completion.min_building_proba,
            ),
            (
                "building_identification.min_building_proba",
                self.building_identification.min_building_proba,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.building_validation.footprints.buffer < 0.0 {
            return Err(ConfigError::Invalid(
                "building_validation.footprints.buffer must be >= 0".to_string(),
            ));
        }

        let labels = &self.optimization.correction_labels;
        if labels.min_frac_fp > labels.min_frac_tp {
            return Err(ConfigError::Invalid(format!(
                "correction_labels: min_frac_fp ({}) must not exceed min_frac_tp ({})",
                labels.min_frac_fp, labels.min_frac_tp
            )));
        }

        let c = &self.optimization.design.constraints;
        for (name, value) in [
            ("min_automation", c.min_automation),
            ("min_precision", c.min_precision),
            ("min_recall", c.min_recall),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "optimization.design.constraints.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.optimization.design.n_trials == 0 {
            return Err(ConfigError::Invalid(
                "optimization.design.n_trials must be >= 1".to_string(),
            ));
        }

        if self.data_format.num_classes < 2 {
            return Err(ConfigError::Invalid(
                "data_format.num_classes must be >= 2".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Data format
// ============================================================================

/// Tile format: CRS, dimension names, classification codes, cleaning lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFormatConfig {
    /// EPSG code of every tile and of footprint requests
    #[serde(default = "default_epsg")]
    pub epsg: u32,

    /// Number of classes of the source classifier; bounds the entropy search
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,

    #[serde(default)]
    pub dimensions: DimensionNames,

    #[serde(default)]
    pub codes: CodesConfig,

    #[serde(default)]
    pub cleaning: CleaningConfig,
}

impl Default for DataFormatConfig {
    fn default() -> Self {
        Self {
            epsg: default_epsg(),
            num_classes: default_num_classes(),
            dimensions: DimensionNames::default(),
            codes: CodesConfig::default(),
            cleaning: CleaningConfig::default(),
        }
    }
}

fn default_epsg() -> u32 {
    2154
}

fn default_num_classes() -> usize {
    7
}

/// Names of the point dimensions the pipeline reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionNames {
    pub classification: String,
    pub building_proba: String,
    pub entropy: String,
    /// Generic cluster-id slot; every stage moves its result out of it and
    /// resets it to 0 so the next stage starts clean.
    pub cluster_id: String,
    pub candidate_flag: String,
    pub candidate_cluster_id: String,
    pub overlay_flag: String,
    pub completion_cluster_id: String,
    pub completion_flag: String,
    pub identified_cluster_id: String,
}

impl Default for DimensionNames {
    fn default() -> Self {
        Self {
            classification: "classification".to_string(),
            building_proba: "building_proba".to_string(),
            entropy: "entropy".to_string(),
            cluster_id: "cluster_id".to_string(),
            candidate_flag: "candidate_flag".to_string(),
            candidate_cluster_id: "candidate_cluster_id".to_string(),
            overlay_flag: "overlay_flag".to_string(),
            completion_cluster_id: "completion_cluster_id".to_string(),
            completion_flag: "completion_flag".to_string(),
            identified_cluster_id: "identified_cluster_id".to_string(),
        }
    }
}

/// Classification codes: input candidates, detailed decisions, final codes,
/// and the detailed → final mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodesConfig {
    /// Input codes marking rule-based candidate building points
    pub candidate_codes: Vec<u8>,

    #[serde(rename = "final")]
    pub final_codes: FinalCodes,

    pub detailed: DetailedCodes,

    /// Pairs `(detailed, final)`; diagnostic codes collapse onto the closed
    /// final set through this table
    pub detailed_to_final: Vec<(u8, u8)>,
}

impl CodesConfig {
    /// Resolve a detailed code to its final counterpart. Unmapped codes fall
    /// back to `unsure`, the safe output for human inspection.
    pub fn final_for(&self, detailed: u8) -> u8 {
        self.detailed_to_final
            .iter()
            .find(|(d, _)| *d == detailed)
            .map_or(self.final_codes.unsure, |(_, f)| *f)
    }
}

impl Default for CodesConfig {
    fn default() -> Self {
        let final_codes = FinalCodes::default();
        let detailed = DetailedCodes::default();
        Self {
            candidate_codes: vec![202],
            detailed_to_final: vec![
                (detailed.ia_refuted, final_codes.not_building),
                (detailed.ia_refuted_but_under_db_uni, final_codes.unsure),
                (detailed.both_unsure, final_codes.unsure),
                (detailed.unsure_by_entropy, final_codes.unsure),
                (detailed.ia_confirmed_only, final_codes.building),
                (detailed.both_confirmed, final_codes.building),
                (detailed.db_overlayed_only, final_codes.unsure),
            ],
            final_codes,
            detailed,
        }
    }
}

/// The closed set of final output codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FinalCodes {
    pub building: u8,
    pub not_building: u8,
    pub unsure: u8,
}

impl Default for FinalCodes {
    fn default() -> Self {
        Self {
            building: 6,
            not_building: 208,
            unsure: 214,
        }
    }
}

/// Diagnostic decision codes, written instead of final codes when the
/// consumer asks for detailed output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetailedCodes {
    pub ia_refuted: u8,
    pub ia_refuted_but_under_db_uni: u8,
    pub both_unsure: u8,
    pub unsure_by_entropy: u8,
    pub ia_confirmed_only: u8,
    pub both_confirmed: u8,
    pub db_overlayed_only: u8,
}

impl Default for DetailedCodes {
    fn default() -> Self {
        Self {
            ia_refuted: 110,
            ia_refuted_but_under_db_uni: 111,
            both_unsure: 112,
            unsure_by_entropy: 113,
            ia_confirmed_only: 114,
            both_confirmed: 115,
            db_overlayed_only: 116,
        }
    }
}

/// Extra dimensions kept by the cleaning passes; everything standard is
/// always kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningConfig {
    /// Extra dims kept when cleaning an input tile
    pub input_extra_dims: Vec<String>,
    /// Extra dims kept when cleaning the pipeline output
    pub output_extra_dims: Vec<String>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            input_extra_dims: vec!["building_proba".to_string(), "entropy".to_string()],
            output_extra_dims: vec![
                "building_proba".to_string(),
                "entropy".to_string(),
                "completion_flag".to_string(),
                "identified_cluster_id".to_string(),
            ],
        }
    }
}

// ============================================================================
// Stage configs
// ============================================================================

/// Building validation (stages 1–2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_validation_cluster")]
    pub cluster: ClusterParams,

    #[serde(default)]
    pub footprints: FootprintsConfig,

    #[serde(default)]
    pub thresholds: DecisionThresholds,

    /// Write final codes (true) or detailed diagnostic codes (false)
    #[serde(default = "default_true")]
    pub use_final_classification_codes: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            cluster: default_validation_cluster(),
            footprints: FootprintsConfig::default(),
            thresholds: DecisionThresholds::default(),
            use_final_classification_codes: true,
        }
    }
}

fn default_validation_cluster() -> ClusterParams {
    ClusterParams {
        min_points: 10,
        tolerance: 0.5,
        is3d: false,
    }
}

/// Where footprints come from and how far beyond the tile to request them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FootprintsConfig {
    /// Shapefile with known building footprints; when unset the driver
    /// expects an externally provided source (live database client)
    #[serde(default)]
    pub shp_path: Option<PathBuf>,

    /// Bbox expansion for the footprint request (meters)
    #[serde(default = "default_buffer")]
    pub buffer: f64,
}

impl Default for FootprintsConfig {
    fn default() -> Self {
        Self {
            shp_path: None,
            buffer: default_buffer(),
        }
    }
}

fn default_buffer() -> f64 {
    50.0
}

/// Building completion (stage 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_cluster")]
    pub cluster: ClusterParams,

    /// Probability floor for pulling a point into the reclustering
    #[serde(default = "default_completion_proba")]
    pub min_building_proba: f64,

    /// Multiplier on the floor for points under a footprint (1.0 = no relaxation)
    #[serde(default = "default_one")]
    pub min_building_proba_relaxation_if_bd_uni_overlay: f64,

    /// Also promote the classification of non-candidate completion points to
    /// `building` instead of only flagging them for inspection
    #[serde(default)]
    pub promote_non_candidates: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            cluster: default_completion_cluster(),
            min_building_proba: default_completion_proba(),
            min_building_proba_relaxation_if_bd_uni_overlay: default_one(),
            promote_non_candidates: false,
        }
    }
}

fn default_completion_cluster() -> ClusterParams {
    ClusterParams {
        min_points: 10,
        tolerance: 0.75,
        is3d: false,
    }
}

fn default_completion_proba() -> f64 {
    0.5
}

/// Building identification (stage 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentificationConfig {
    #[serde(default = "default_identification_cluster")]
    pub cluster: ClusterParams,

    #[serde(default = "default_identification_proba")]
    pub min_building_proba: f64,

    /// Multiplier on the floor for points under a footprint (1.0 = no relaxation)
    #[serde(default = "default_one")]
    pub min_building_proba_relaxation_if_bd_uni_overlay: f64,
}

impl Default for IdentificationConfig {
    fn default() -> Self {
        Self {
            cluster: default_identification_cluster(),
            min_building_proba: default_identification_proba(),
            min_building_proba_relaxation_if_bd_uni_overlay: default_one(),
        }
    }
}

fn default_identification_cluster() -> ClusterParams {
    ClusterParams {
        min_points: 50,
        tolerance: 0.5,
        is3d: false,
    }
}

fn default_identification_proba() -> f64 {
    0.75
}

fn default_one() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Optimizer config
// ============================================================================

/// Threshold optimization over a corpus of hand-corrected tiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Phases to run, `+`-separated: prepare, optimize, evaluate, update
    #[serde(default = "default_todo")]
    pub todo: String,

    #[serde(default)]
    pub design: SearchDesign,

    #[serde(default)]
    pub correction_labels: CorrectionLabels,

    /// Write final codes during the update phase; detailed codes are the
    /// default so corrections can be inspected
    #[serde(default)]
    pub use_final_classification_codes: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            todo: default_todo(),
            design: SearchDesign::default(),
            correction_labels: CorrectionLabels::default(),
            use_final_classification_codes: false,
        }
    }
}

fn default_todo() -> String {
    "prepare+optimize+evaluate+update".to_string()
}

/// Trial budget and selection constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDesign {
    #[serde(default = "default_n_trials")]
    pub n_trials: usize,

    /// Seed for the trial sampler; unset means nondeterministic
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub constraints: Constraints,
}

impl Default for SearchDesign {
    fn default() -> Self {
        Self {
            n_trials: default_n_trials(),
            seed: None,
            constraints: Constraints::default(),
        }
    }
}

fn default_n_trials() -> usize {
    400
}

/// Hard floors a winning trial must satisfy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Constraints {
    pub min_automation: f64,
    pub min_precision: f64,
    pub min_recall: f64,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            min_automation: 0.35,
            min_precision: 0.98,
            min_recall: 0.98,
        }
    }
}

/// Ground-truth folding rule for hand-corrected tiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionLabels {
    /// Corrected codes meaning "really a building"
    pub tp_codes: Vec<u8>,
    /// Corrected codes meaning "wrongly proposed as building"
    pub fp_codes: Vec<u8>,
    /// At or above this true-positive fraction a cluster is a building
    pub min_frac_tp: f64,
    /// Below this fraction it is not a building; in between it is ambiguous
    pub min_frac_fp: f64,
}

impl Default for CorrectionLabels {
    fn default() -> Self {
        Self {
            tp_codes: vec![19],
            fp_codes: vec![20],
            min_frac_tp: 0.95,
            min_frac_fp: 0.05,
        }
    }
}

// ============================================================================
// Driver config
// ============================================================================

/// Per-stage toggles for the pipeline driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub validate: bool,

    #[serde(default = "default_true")]
    pub complete: bool,

    #[serde(default = "default_true")]
    pub identify: bool,

    /// Strip extra dims down to `cleaning.input_extra_dims` before the stages
    #[serde(default)]
    pub clean_input: bool,

    /// Strip extra dims down to `cleaning.output_extra_dims` before writing
    #[serde(default)]
    pub clean_output: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            validate: true,
            complete: true,
            identify: true,
            clean_input: false,
            clean_output: false,
        }
    }
}

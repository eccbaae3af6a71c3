//! Threshold optimization over a corpus of hand-corrected tiles.
//!
//! Data preparation (clustering + footprint overlay) is by far the slowest
//! part of validation, so the optimizer splits the work into four phases that
//! can be rerun independently:
//!
//! - **prepare**: run validation preparation on every corpus tile once, cache
//!   the prepared tiles on disk and serialize one flat list of cluster
//!   information with ground-truth labels folded in.
//! - **optimize**: sample threshold sets, replay the cluster decision on the
//!   cached list for each trial, and select the best trial under the
//!   constraint floors.
//! - **evaluate**: recompute the metrics with the selected thresholds.
//! - **update**: rewrite the cached prepared tiles with decisions from the
//!   selected thresholds, for inspection.

mod metrics;
mod sampler;

pub use metrics::{evaluate_decisions, DecisionMetrics};
pub use sampler::{TrialSampler, UniformSampler};

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::defaults::{
    GROUP_INFO_FILE, METRICS_FILE, PREPARED_SUBDIR, THRESHOLDS_FILE, UPDATED_SUBDIR,
};
use crate::config::AppConfig;
use crate::footprint::{FootprintError, FootprintSource, ShapefileFootprints};
use crate::store::{PointStore, StoreError};
use crate::tile::{self, TileIoError};
use crate::validation::{
    decide_cluster, BuildingValidator, ClusterInfo, DecisionThresholds, ThresholdsError,
    ValidationError,
};

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("no LAS/LAZ tiles found in corpus directory {0}")]
    EmptyCorpus(PathBuf),

    #[error("corpus produced no candidate clusters, nothing to optimize")]
    NoClusters,

    #[error(
        "the optimizer needs an on-disk footprint source \
         (building_validation.footprints.shp_path)"
    )]
    MissingFootprints,

    #[error("failed to access {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("cluster cache {0} is unreadable: {1}")]
    ClusterCache(PathBuf, #[source] bincode::Error),

    #[error(transparent)]
    Tile(#[from] TileIoError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Thresholds(#[from] ThresholdsError),

    #[error(transparent)]
    Footprint(#[from] FootprintError),
}

/// One evaluated trial.
#[derive(Debug, Clone)]
pub struct TrialResult {
    pub index: usize,
    pub thresholds: DecisionThresholds,
    pub automation: f64,
    pub precision: f64,
    pub recall: f64,
    /// Sum of constraint-floor violations; 0 means feasible
    pub penalty: f64,
}

/// Four-phase optimizer of the validation decision thresholds.
pub struct BuildingThresholdOptimizer {
    config: AppConfig,
    validator: BuildingValidator,
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl BuildingThresholdOptimizer {
    /// `input_dir` holds the hand-corrected corpus; artifacts land under
    /// `output_dir` (`prepared/`, `updated/`, the cluster cache and the
    /// winning thresholds).
    pub fn new(config: &AppConfig, input_dir: &Path, output_dir: &Path) -> Self {
        let mut validator =
            BuildingValidator::new(&config.data_format, &config.building_validation);
        // Corrected tiles carry corrected labels, not production candidate
        // codes: candidates are whatever the correction marked as proposed
        let labels = &config.optimization.correction_labels;
        let mut candidate_codes = labels.tp_codes.clone();
        candidate_codes.extend(&labels.fp_codes);
        validator.set_candidate_codes(candidate_codes);
        validator.set_use_final_codes(config.optimization.use_final_classification_codes);

        Self {
            config: config.clone(),
            validator,
            input_dir: input_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Run the phases selected by `optimization.todo`.
    pub fn run(&mut self) -> Result<(), OptimizeError> {
        let todo = self.config.optimization.todo.clone();
        if todo.contains("prepare") {
            self.prepare()?;
        }
        if todo.contains("optimize") {
            self.optimize()?;
        }
        if todo.contains("evaluate") {
            let metrics = self.evaluate()?;
            info!("evaluation results:\n{metrics}");
        }
        if todo.contains("update") {
            self.update()?;
        }
        Ok(())
    }

    fn corpus_paths(&self) -> Result<Vec<PathBuf>, OptimizeError> {
        let paths = tile::discover_tiles(&self.input_dir)?;
        if paths.is_empty() {
            return Err(OptimizeError::EmptyCorpus(self.input_dir.clone()));
        }
        Ok(paths)
    }

    fn footprint_source(&self) -> Result<ShapefileFootprints, OptimizeError> {
        let path = self
            .config
            .building_validation
            .footprints
            .shp_path
            .as_ref()
            .ok_or(OptimizeError::MissingFootprints)?;
        Ok(ShapefileFootprints::new(path, self.config.data_format.epsg))
    }

    fn cluster_cache_path(&self) -> PathBuf {
        self.output_dir.join(GROUP_INFO_FILE)
    }

    fn thresholds_path(&self) -> PathBuf {
        self.output_dir.join(THRESHOLDS_FILE)
    }

    /// Phase 1: prepare every corpus tile, cache it, and serialize the
    /// labelled cluster list.
    pub fn prepare(&self) -> Result<(), OptimizeError> {
        let paths = self.corpus_paths()?;
        let source = self.footprint_source()?;
        let epsg = self.config.data_format.epsg;

        let mut clusters: Vec<ClusterInfo> = Vec::new();
        for path in &paths {
            info!(tile = %path.display(), "preparing corpus tile");
            let (mut store, meta) = tile::read_tile(path)?;
            let bbox = self.validator.request_bbox(&store)?;
            let footprints = source.fetch(&bbox, epsg)?;
            self.validator.prepare(&mut store, &footprints)?;

            let prepared = self
                .output_dir
                .join(PREPARED_SUBDIR)
                .join(path.file_name().unwrap_or_default());
            tile::write_tile(&store, &meta, &prepared)?;

            clusters.extend(self.extract_labelled_clusters(&store)?);
        }
        info!(
            tiles = paths.len(),
            clusters = clusters.len(),
            "corpus preparation done"
        );

        let cache = self.cluster_cache_path();
        if let Some(parent) = cache.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OptimizeError::Io(cache.clone(), e))?;
        }
        let file =
            std::fs::File::create(&cache).map_err(|e| OptimizeError::Io(cache.clone(), e))?;
        bincode::serialize_into(BufWriter::new(file), &clusters)
            .map_err(|e| OptimizeError::ClusterCache(cache, e))?;
        Ok(())
    }

    /// Ground-truth fold plus decision inputs for every candidate cluster of
    /// a prepared store.
    fn extract_labelled_clusters(
        &self,
        store: &PointStore,
    ) -> Result<Vec<ClusterInfo>, OptimizeError> {
        let dims = self.validator.dimension_names();
        let finals = self.validator.codes().final_codes;
        let labels = &self.config.optimization.correction_labels;

        let classification = store.u8s(&dims.classification)?;
        let groups = store.group_by(&dims.candidate_cluster_id)?;
        let mut clusters = Vec::new();
        for (cluster_id, indices) in &groups {
            if *cluster_id == 0 {
                continue;
            }
            let mut info = self.validator.extract_cluster_info(store, indices)?;
            let tp = indices
                .iter()
                .filter(|&&i| labels.tp_codes.contains(&classification[i]))
                .count() as f64;
            let tp_frac = tp / indices.len() as f64;
            info.target = Some(if tp_frac >= labels.min_frac_tp {
                finals.building
            } else if tp_frac < labels.min_frac_fp {
                finals.not_building
            } else {
                finals.unsure
            });
            clusters.push(info);
        }
        Ok(clusters)
    }

    fn load_clusters(&self) -> Result<Vec<ClusterInfo>, OptimizeError> {
        let cache = self.cluster_cache_path();
        let file = std::fs::File::open(&cache).map_err(|e| OptimizeError::Io(cache.clone(), e))?;
        let clusters: Vec<ClusterInfo> = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| OptimizeError::ClusterCache(cache, e))?;
        Ok(clusters)
    }

    /// Final decision codes for every cluster under one threshold set.
    fn decide_all(&self, clusters: &[ClusterInfo], thresholds: &DecisionThresholds) -> Vec<u8> {
        let codes = self.validator.codes();
        clusters
            .par_iter()
            .map(|info| codes.final_for(decide_cluster(info, thresholds).code(&codes.detailed)))
            .collect()
    }

    fn score(
        &self,
        clusters: &[ClusterInfo],
        targets: &[u8],
        thresholds: &DecisionThresholds,
    ) -> (f64, f64, f64) {
        let decisions = self.decide_all(clusters, thresholds);
        let finals = self.validator.codes().final_codes;
        let m = evaluate_decisions(targets, &decisions, &finals);
        let zero_if_nan = |v: f64| if v.is_nan() { 0.0 } else { v };
        (
            zero_if_nan(m.automation),
            zero_if_nan(m.precision),
            zero_if_nan(m.recall),
        )
    }

    fn compute_penalty(&self, automation: f64, precision: f64, recall: f64) -> f64 {
        let c = &self.config.optimization.design.constraints;
        let mut penalty = 0.0;
        if precision < c.min_precision {
            penalty += c.min_precision - precision;
        }
        if recall < c.min_recall {
            penalty += c.min_recall - recall;
        }
        if automation < c.min_automation {
            penalty += c.min_automation - automation;
        }
        penalty
    }

    fn sample_thresholds(sampler: &mut dyn TrialSampler, max_entropy: f64) -> DecisionThresholds {
        DecisionThresholds {
            min_confidence_confirmation: sampler.suggest_float(
                "min_confidence_confirmation",
                0.0,
                1.0,
            ),
            min_frac_confirmation: sampler.suggest_float("min_frac_confirmation", 0.0, 1.0),
            min_confidence_refutation: sampler.suggest_float(
                "min_confidence_refutation",
                0.0,
                1.0,
            ),
            min_frac_refutation: sampler.suggest_float("min_frac_refutation", 0.0, 1.0),
            min_uni_db_overlay_frac: sampler.suggest_float("min_uni_db_overlay_frac", 0.5, 1.0),
            min_frac_confirmation_factor_if_bd_uni_overlay: sampler.suggest_float(
                "min_frac_confirmation_factor_if_bd_uni_overlay",
                0.5,
                1.0,
            ),
            min_entropy_uncertainty: sampler.suggest_float(
                "min_entropy_uncertainty",
                0.0,
                max_entropy,
            ),
            min_frac_entropy_uncertain: sampler.suggest_float(
                "min_frac_entropy_uncertain",
                0.33,
                1.0,
            ),
        }
    }

    /// Phase 2: trial search. Serializes and returns the winning thresholds.
    pub fn optimize(&mut self) -> Result<DecisionThresholds, OptimizeError> {
        let clusters = self.load_clusters()?;
        if clusters.is_empty() {
            return Err(OptimizeError::NoClusters);
        }
        let unsure = self.validator.codes().final_codes.unsure;
        let targets: Vec<u8> = clusters.iter().map(|c| c.target.unwrap_or(unsure)).collect();

        let design = self.config.optimization.design.clone();
        let max_entropy =
            DecisionThresholds::max_entropy_bound(self.config.data_format.num_classes);
        let mut sampler = UniformSampler::new(design.seed);

        let mut trials = Vec::with_capacity(design.n_trials);
        for index in 0..design.n_trials {
            let thresholds = Self::sample_thresholds(&mut sampler, max_entropy);
            let (automation, precision, recall) = self.score(&clusters, &targets, &thresholds);
            let penalty = self.compute_penalty(automation, precision, recall);
            trials.push(TrialResult {
                index,
                thresholds,
                automation,
                precision,
                recall,
                penalty,
            });
        }

        let best = Self::select_best(&trials);
        info!(
            trial = best.index,
            automation = best.automation,
            precision = best.precision,
            recall = best.recall,
            penalty = best.penalty,
            "selected thresholds"
        );

        let selected = best.thresholds;
        let path = self.thresholds_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OptimizeError::Io(path.clone(), e))?;
        }
        selected.dump(&path)?;
        info!(path = %path.display(), "thresholds serialized");
        self.validator.set_thresholds(selected);
        Ok(selected)
    }

    /// Best-first by automation among feasible trials; product of the three
    /// metrics as fallback when no trial meets the floors. Ties keep the
    /// earliest trial, which keeps the selection deterministic.
    fn select_best(trials: &[TrialResult]) -> &TrialResult {
        let feasible = trials
            .iter()
            .filter(|t| t.penalty <= 0.0)
            .fold(None::<&TrialResult>, |best, t| match best {
                Some(b) if b.automation >= t.automation => Some(b),
                _ => Some(t),
            });
        if let Some(best) = feasible {
            return best;
        }
        warn!("no trial satisfies the constraint floors, falling back to metric product");
        trials
            .iter()
            .fold(None::<&TrialResult>, |best, t| {
                let product = t.automation * t.precision * t.recall;
                match best {
                    Some(b) if b.automation * b.precision * b.recall >= product => Some(b),
                    _ => Some(t),
                }
            })
            .unwrap_or(&trials[0])
    }

    fn reload_thresholds_if_available(&mut self) -> Result<(), OptimizeError> {
        let path = self.thresholds_path();
        if path.exists() {
            self.validator
                .set_thresholds(DecisionThresholds::load(&path)?);
        } else {
            warn!(
                path = %path.display(),
                "no serialized thresholds found, using current validator thresholds"
            );
        }
        Ok(())
    }

    /// Phase 3: metrics of the selected thresholds on the cached corpus.
    pub fn evaluate(&mut self) -> Result<DecisionMetrics, OptimizeError> {
        let clusters = self.load_clusters()?;
        if clusters.is_empty() {
            return Err(OptimizeError::NoClusters);
        }
        self.reload_thresholds_if_available()?;
        let unsure = self.validator.codes().final_codes.unsure;
        let targets: Vec<u8> = clusters.iter().map(|c| c.target.unwrap_or(unsure)).collect();
        let decisions = self.decide_all(&clusters, self.validator.thresholds());
        let metrics =
            evaluate_decisions(&targets, &decisions, &self.validator.codes().final_codes);

        let path = self.output_dir.join(METRICS_FILE);
        let json =
            serde_json::to_string_pretty(&metrics.to_map()).unwrap_or_else(|_| "{}".to_string());
        std::fs::write(&path, json).map_err(|e| OptimizeError::Io(path, e))?;
        Ok(metrics)
    }

    /// Phase 4: rewrite the prepared tiles with decisions from the selected
    /// thresholds.
    pub fn update(&mut self) -> Result<(), OptimizeError> {
        self.reload_thresholds_if_available()?;
        let prepared_dir = self.output_dir.join(PREPARED_SUBDIR);
        let paths = tile::discover_tiles(&prepared_dir)?;
        if paths.is_empty() {
            return Err(OptimizeError::EmptyCorpus(prepared_dir));
        }
        for path in &paths {
            let (mut store, meta) = tile::read_tile(path)?;
            self.validator.update(&mut store)?;
            let updated = self
                .output_dir
                .join(UPDATED_SUBDIR)
                .join(path.file_name().unwrap_or_default());
            tile::write_tile(&store, &meta, &updated)?;
            info!(tile = %updated.display(), "updated tile written");
        }
        Ok(())
    }
}

//! Building validation: cluster candidate points, overlay known footprints,
//! then confirm, refute or defer every cluster.
//!
//! Candidates arrive marked in the classification channel by an upstream
//! rule-based algorithm. Validation runs in two substeps so the optimizer can
//! prepare once and decide many times:
//!
//! - **prepare**: flag candidates, cluster them, flag points under a known
//!   footprint. Does not touch the classification channel.
//! - **update**: per cluster, fuse probabilities, overlay and entropy into a
//!   detailed decision code, optionally collapsed onto the final code set.

mod thresholds;

pub use thresholds::{DecisionThresholds, ThresholdsError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cluster::{self, ClusterParams};
use crate::config::{CodesConfig, DataFormatConfig, DimensionNames, ValidationConfig};
use crate::footprint::{Bbox, FootprintError, FootprintSource, PolygonSet};
use crate::overlay::{self, OverlayError};
use crate::store::{DimType, PointStore, StoreError};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Overlay(#[from] OverlayError),

    #[error(transparent)]
    Footprint(#[from] FootprintError),

    #[error("store has no points, cannot derive a footprint request bbox")]
    EmptyStore,
}

/// Everything needed to decide one cluster of candidate building points.
///
/// `target` carries the ground-truth final code and is only filled by the
/// optimizer when folding hand-corrected labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub probabilities: Vec<f32>,
    pub overlays: Vec<u8>,
    pub entropies: Vec<f32>,
    pub target: Option<u8>,
}

/// Detailed outcome of the cluster-level decision, before the optional
/// collapse onto final codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailedDecision {
    IaRefuted,
    IaRefutedButUnderDbUni,
    IaConfirmedOnly,
    BothConfirmed,
    DbOverlayedOnly,
    UnsureByEntropy,
    BothUnsure,
}

impl DetailedDecision {
    /// Numeric code of this decision under the configured code set.
    pub fn code(self, codes: &crate::config::DetailedCodes) -> u8 {
        match self {
            DetailedDecision::IaRefuted => codes.ia_refuted,
            DetailedDecision::IaRefutedButUnderDbUni => codes.ia_refuted_but_under_db_uni,
            DetailedDecision::IaConfirmedOnly => codes.ia_confirmed_only,
            DetailedDecision::BothConfirmed => codes.both_confirmed,
            DetailedDecision::DbOverlayedOnly => codes.db_overlayed_only,
            DetailedDecision::UnsureByEntropy => codes.unsure_by_entropy,
            DetailedDecision::BothUnsure => codes.both_unsure,
        }
    }
}

/// Cluster-level decision. Pure: shared verbatim between the production
/// update pass and the optimizer's trial loop.
///
/// All inequalities are weak. Precedence: with low entropy the model may
/// refute or confirm (refutation first); otherwise the vector database alone
/// may still flag the cluster; what remains is unsure, attributed to entropy
/// when entropy caused it.
pub fn decide_cluster(info: &ClusterInfo, t: &DecisionThresholds) -> DetailedDecision {
    let n = info.probabilities.len() as f64;

    let uncertain = info
        .entropies
        .iter()
        .filter(|&&h| f64::from(h) >= t.min_entropy_uncertainty)
        .count() as f64;
    let high_entropy = uncertain / n >= t.min_frac_entropy_uncertain;

    // Confirmation, with the threshold relaxed for points under a footprint
    let relaxed = t.min_confidence_confirmation * t.min_frac_confirmation_factor_if_bd_uni_overlay;
    let confirming = info
        .probabilities
        .iter()
        .zip(&info.overlays)
        .filter(|&(&p, &o)| {
            let p = f64::from(p);
            p >= t.min_confidence_confirmation || (o != 0 && p >= relaxed)
        })
        .count() as f64;
    let ia_confirmed = confirming / n >= t.min_frac_confirmation;

    let refuting = info
        .probabilities
        .iter()
        .filter(|&&p| 1.0 - f64::from(p) >= t.min_confidence_refutation)
        .count() as f64;
    let ia_refuted = refuting / n >= t.min_frac_refutation;

    let overlaid = info.overlays.iter().filter(|&&o| o != 0).count() as f64;
    let uni_overlayed = overlaid / n >= t.min_uni_db_overlay_frac;

    if !high_entropy {
        if ia_refuted {
            return if uni_overlayed {
                DetailedDecision::IaRefutedButUnderDbUni
            } else {
                DetailedDecision::IaRefuted
            };
        }
        if ia_confirmed {
            return if uni_overlayed {
                DetailedDecision::BothConfirmed
            } else {
                DetailedDecision::IaConfirmedOnly
            };
        }
    }
    if uni_overlayed {
        return DetailedDecision::DbOverlayedOnly;
    }
    if high_entropy {
        DetailedDecision::UnsureByEntropy
    } else {
        DetailedDecision::BothUnsure
    }
}

/// Stage 1–2 of the pipeline.
pub struct BuildingValidator {
    cluster: ClusterParams,
    dims: DimensionNames,
    codes: CodesConfig,
    candidate_codes: Vec<u8>,
    thresholds: DecisionThresholds,
    use_final_classification_codes: bool,
    footprint_buffer: f64,
    epsg: u32,
}

impl BuildingValidator {
    pub fn new(data_format: &DataFormatConfig, config: &ValidationConfig) -> Self {
        Self {
            cluster: config.cluster,
            dims: data_format.dimensions.clone(),
            codes: data_format.codes.clone(),
            candidate_codes: data_format.codes.candidate_codes.clone(),
            thresholds: config.thresholds,
            use_final_classification_codes: config.use_final_classification_codes,
            footprint_buffer: config.footprints.buffer,
            epsg: data_format.epsg,
        }
    }

    pub fn thresholds(&self) -> &DecisionThresholds {
        &self.thresholds
    }

    /// Swap the decision thresholds. Exclusive access makes the swap atomic
    /// relative to any `run`/`update` call.
    pub fn set_thresholds(&mut self, thresholds: DecisionThresholds) {
        self.thresholds = thresholds;
    }

    /// Override the candidate code set. The optimizer points this at the
    /// hand-corrected label codes of its corpus.
    pub fn set_candidate_codes(&mut self, codes: Vec<u8>) {
        self.candidate_codes = codes;
    }

    pub fn set_use_final_codes(&mut self, use_final: bool) {
        self.use_final_classification_codes = use_final;
    }

    /// Buffered, integer-snapped bbox for the footprint request.
    pub fn request_bbox(&self, store: &PointStore) -> Result<Bbox, ValidationError> {
        let bounds = store.bounds()?.ok_or(ValidationError::EmptyStore)?;
        let (x_min, y_min, x_max, y_max) = bounds.buffered_int_xy(self.footprint_buffer);
        Ok(Bbox::new(x_min, y_min, x_max, y_max))
    }

    /// Full validation: fetch footprints, prepare, then update.
    pub fn run(
        &self,
        store: &mut PointStore,
        source: &dyn FootprintSource,
    ) -> Result<(), ValidationError> {
        let bbox = self.request_bbox(store)?;
        let footprints = source.fetch(&bbox, self.epsg)?;
        self.prepare(store, &footprints)?;
        self.update(store)
    }

    /// Preparation: candidate flag, candidate clustering, footprint overlay.
    ///
    /// Leaves the classification channel untouched so the optimizer can
    /// prepare once and then evaluate many threshold sets on the same data.
    pub fn prepare(
        &self,
        store: &mut PointStore,
        footprints: &PolygonSet,
    ) -> Result<(), ValidationError> {
        let dims = &self.dims;

        // Fail fast when the tile has no classification channel
        store.u8s(&dims.classification)?;

        // Flag rule-based candidates
        store.add_dimension(&dims.candidate_flag, DimType::U8);
        store.fill(&dims.candidate_flag, 0.0)?;
        let candidate_codes = &self.candidate_codes;
        store.assign_where(&dims.candidate_flag, 1.0, |s, i| {
            s.u8s(&dims.classification)
                .map(|c| candidate_codes.contains(&c[i]))
                .unwrap_or(false)
        })?;

        // Cluster candidates into the generic id slot, then move the ids to
        // their own dimension and reset the slot for later stages
        let labels = {
            let flags = store.u8s(&self.dims.candidate_flag)?;
            cluster::compute_clusters(store, &self.cluster, |i| flags[i] == 1)?
        };
        store.add_dimension(&self.dims.cluster_id, DimType::U32);
        store.u32s_mut(&self.dims.cluster_id)?.copy_from_slice(&labels.ids);
        cluster::relocate_ids(store, &self.dims.cluster_id, &self.dims.candidate_cluster_id)?;
        debug!(clusters = labels.count, "candidate clustering done");

        overlay::flag_overlayed_points(store, footprints, &self.dims.overlay_flag)?;
        Ok(())
    }

    /// Decision: update the classification channel cluster by cluster.
    pub fn update(&self, store: &mut PointStore) -> Result<(), ValidationError> {
        let dims = &self.dims;

        // Give every candidate point a defined final value first, so points
        // of the unclustered bucket end up refuted rather than untouched
        store.assign_where(
            &dims.classification,
            f64::from(self.codes.final_codes.not_building),
            |s, i| {
                s.u8s(&dims.candidate_flag)
                    .map(|f| f[i] == 1)
                    .unwrap_or(false)
            },
        )?;

        let groups = store.group_by(&self.dims.candidate_cluster_id)?;
        let mut decided = 0usize;
        for (cluster_id, indices) in &groups {
            if *cluster_id == 0 {
                continue;
            }
            let info = self.extract_cluster_info(store, indices)?;
            let code = self.decision_code(&info);
            let classification = store.u8s_mut(&self.dims.classification)?;
            for &i in indices {
                classification[i] = code;
            }
            decided += 1;
        }
        info!(clusters = decided, "cluster decisions written");
        Ok(())
    }

    /// Numeric classification code for one cluster under the current
    /// thresholds and code mapping.
    pub fn decision_code(&self, info: &ClusterInfo) -> u8 {
        let detailed = decide_cluster(info, &self.thresholds).code(&self.codes.detailed);
        if self.use_final_classification_codes {
            self.codes.final_for(detailed)
        } else {
            detailed
        }
    }

    /// Gather the decision inputs for the given point indices.
    pub fn extract_cluster_info(
        &self,
        store: &PointStore,
        indices: &[usize],
    ) -> Result<ClusterInfo, StoreError> {
        let probabilities = store.f32s(&self.dims.building_proba)?;
        let overlays = store.u8s(&self.dims.overlay_flag)?;
        let entropies = store.f32s(&self.dims.entropy)?;
        Ok(ClusterInfo {
            probabilities: indices.iter().map(|&i| probabilities[i]).collect(),
            overlays: indices.iter().map(|&i| overlays[i]).collect(),
            entropies: indices.iter().map(|&i| entropies[i]).collect(),
            target: None,
        })
    }

    pub fn dimension_names(&self) -> &DimensionNames {
        &self.dims
    }

    pub fn codes(&self) -> &CodesConfig {
        &self.codes
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }
}

//! Building identification: group the remaining high-probability points into
//! new building candidates.
//!
//! The rule-based algorithm missed these points entirely, so no decision is
//! made here: the groups land in their own cluster-id dimension and are
//! surfaced to downstream inspection tooling. The classification channel is
//! never touched.

use tracing::info;

use crate::cluster::{self, ClusterParams};
use crate::config::{DataFormatConfig, DimensionNames, FinalCodes, IdentificationConfig};
use crate::store::{DimType, PointStore, StoreError};

/// Stage 4 of the pipeline.
pub struct BuildingIdentifier {
    cluster: ClusterParams,
    min_building_proba: f64,
    relaxation_if_overlay: f64,
    dims: DimensionNames,
    final_codes: FinalCodes,
}

impl BuildingIdentifier {
    pub fn new(data_format: &DataFormatConfig, config: &IdentificationConfig) -> Self {
        Self {
            cluster: config.cluster,
            min_building_proba: config.min_building_proba,
            relaxation_if_overlay: config.min_building_proba_relaxation_if_bd_uni_overlay,
            dims: data_format.dimensions.clone(),
            final_codes: data_format.codes.final_codes,
        }
    }

    /// Cluster unexplained high-probability points into
    /// `identified_cluster_id`.
    pub fn run(&self, store: &mut PointStore) -> Result<(), StoreError> {
        let dims = &self.dims;
        let building = self.final_codes.building;

        // Earlier stages may be disabled; default their dimensions to zeros
        store.add_dimension(&dims.candidate_flag, DimType::U8);
        store.add_dimension(&dims.completion_flag, DimType::U8);
        store.add_dimension(&dims.overlay_flag, DimType::U8);

        store.add_dimension(&dims.cluster_id, DimType::U32);
        store.fill(&dims.cluster_id, 0.0)?;

        let labels = {
            let probabilities = store.f32s(&dims.building_proba)?;
            let classification = store.u8s(&dims.classification)?;
            let candidate_flags = store.u8s(&dims.candidate_flag)?;
            let completion_flags = store.u8s(&dims.completion_flag)?;
            let overlays = store.u8s(&dims.overlay_flag)?;
            let relaxed = self.min_building_proba * self.relaxation_if_overlay;
            cluster::compute_clusters(store, &self.cluster, |i| {
                let p = f64::from(probabilities[i]);
                candidate_flags[i] == 0
                    && classification[i] != building
                    && completion_flags[i] != 1
                    && (p >= self.min_building_proba || (overlays[i] != 0 && p >= relaxed))
            })?
        };
        store.u32s_mut(&dims.cluster_id)?.copy_from_slice(&labels.ids);
        cluster::relocate_ids(store, &dims.cluster_id, &dims.identified_cluster_id)?;

        info!(groups = labels.count, "building identification done");
        Ok(())
    }
}

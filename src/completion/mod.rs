//! Building completion: attach isolated high-probability points to confirmed
//! buildings.
//!
//! Some building points are too isolated for the validator to cluster them
//! with their building. A relaxed 2D reclustering groups high-probability
//! points together with already confirmed buildings; inside a group that
//! contains confirmed points, candidates are promoted to `building` and
//! non-candidates are flagged for inspection (or promoted too, when the
//! deployment opts in).

use tracing::info;

use crate::cluster::{self, ClusterParams};
use crate::config::{CompletionConfig, DataFormatConfig, DimensionNames, FinalCodes};
use crate::store::{DimType, PointStore, StoreError};

/// Stage 3 of the pipeline.
pub struct BuildingCompletor {
    cluster: ClusterParams,
    min_building_proba: f64,
    relaxation_if_overlay: f64,
    promote_non_candidates: bool,
    dims: DimensionNames,
    final_codes: FinalCodes,
}

impl BuildingCompletor {
    pub fn new(data_format: &DataFormatConfig, config: &CompletionConfig) -> Self {
        Self {
            cluster: config.cluster,
            min_building_proba: config.min_building_proba,
            relaxation_if_overlay: config.min_building_proba_relaxation_if_bd_uni_overlay,
            promote_non_candidates: config.promote_non_candidates,
            dims: data_format.dimensions.clone(),
            final_codes: data_format.codes.final_codes,
        }
    }

    /// Recluster and extend confirmed buildings in place.
    pub fn run(&self, store: &mut PointStore) -> Result<(), StoreError> {
        let dims = &self.dims;
        let building = self.final_codes.building;

        // Earlier stages may be disabled; default their dimensions to zeros
        store.add_dimension(&dims.candidate_flag, DimType::U8);
        store.add_dimension(&dims.overlay_flag, DimType::U8);

        // The generic id slot must start clean
        store.add_dimension(&dims.cluster_id, DimType::U32);
        store.fill(&dims.cluster_id, 0.0)?;

        let labels = {
            let probabilities = store.f32s(&dims.building_proba)?;
            let classification = store.u8s(&dims.classification)?;
            let overlays = store.u8s(&dims.overlay_flag)?;
            let relaxed = self.min_building_proba * self.relaxation_if_overlay;
            cluster::compute_clusters(store, &self.cluster, |i| {
                let p = f64::from(probabilities[i]);
                classification[i] == building
                    || p >= self.min_building_proba
                    || (overlays[i] != 0 && p >= relaxed)
            })?
        };
        store.u32s_mut(&dims.cluster_id)?.copy_from_slice(&labels.ids);
        cluster::relocate_ids(store, &dims.cluster_id, &dims.completion_cluster_id)?;

        store.add_dimension(&dims.completion_flag, DimType::U8);

        // Inside each group holding at least one confirmed point, promote
        // candidates and flag the rest
        let groups = store.group_by(&dims.completion_cluster_id)?;
        let mut to_building: Vec<usize> = Vec::new();
        let mut to_flag: Vec<usize> = Vec::new();
        {
            let classification = store.u8s(&dims.classification)?;
            let candidate_flags = store.u8s(&dims.candidate_flag)?;
            for (cluster_id, indices) in &groups {
                if *cluster_id == 0 {
                    continue;
                }
                if !indices.iter().any(|&i| classification[i] == building) {
                    continue;
                }
                for &i in indices {
                    if candidate_flags[i] == 1 {
                        to_building.push(i);
                    } else {
                        to_flag.push(i);
                        if self.promote_non_candidates {
                            to_building.push(i);
                        }
                    }
                }
            }
        }
        {
            let classification = store.u8s_mut(&dims.classification)?;
            for &i in &to_building {
                classification[i] = building;
            }
        }
        {
            let completion_flags = store.u8s_mut(&dims.completion_flag)?;
            for &i in &to_flag {
                completion_flags[i] = 1;
            }
        }
        info!(
            groups = labels.count,
            promoted = to_building.len(),
            flagged = to_flag.len(),
            "building completion done"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::store::Column;

    /// Chain of points 0.5 m apart: [0..8) confirmed building candidates,
    /// [8..11) isolated high-probability non-candidates, [11] far-away noise.
    fn prepared_store(final_codes: &FinalCodes) -> PointStore {
        let n = 12;
        let mut store = PointStore::with_len(n);
        let xs: Vec<f64> = (0..11).map(|i| f64::from(i) * 0.5).chain([500.0]).collect();
        store.insert_column("x", Column::F64(xs)).unwrap();
        store.insert_column("y", Column::F64(vec![0.0; n])).unwrap();
        store.insert_column("z", Column::F64(vec![10.0; n])).unwrap();
        let b = final_codes.building;
        let mut classification = vec![b; 8];
        classification.extend([1, 1, 1, 1]);
        store
            .insert_column("classification", Column::U8(classification))
            .unwrap();
        let mut probabilities = vec![0.9f32; 8];
        probabilities.extend([0.8, 0.7, 0.6, 0.9]);
        store
            .insert_column("building_proba", Column::F32(probabilities))
            .unwrap();
        store
            .insert_column("entropy", Column::F32(vec![0.1; n]))
            .unwrap();
        let mut candidates = vec![1u8; 8];
        candidates.extend([0, 0, 0, 0]);
        store
            .insert_column("candidate_flag", Column::U8(candidates))
            .unwrap();
        store
    }

    fn completor(config: &AppConfig) -> BuildingCompletor {
        BuildingCompletor::new(&config.data_format, &config.building_completion)
    }

    #[test]
    fn non_candidates_are_flagged_not_promoted() {
        let config = AppConfig::default();
        let finals = config.data_format.codes.final_codes;
        let mut store = prepared_store(&finals);
        completor(&config).run(&mut store).unwrap();

        let flags = store.u8s("completion_flag").unwrap();
        assert_eq!(&flags[8..11], &[1, 1, 1]);
        assert_eq!(flags[11], 0);

        // Classification of flagged points stays for human inspection
        let classification = store.u8s("classification").unwrap();
        assert_eq!(&classification[8..11], &[1, 1, 1]);
    }

    #[test]
    fn promotion_bit_also_updates_classification() {
        let mut config = AppConfig::default();
        config.building_completion.promote_non_candidates = true;
        let finals = config.data_format.codes.final_codes;
        let mut store = prepared_store(&finals);
        completor(&config).run(&mut store).unwrap();

        let classification = store.u8s("classification").unwrap();
        assert_eq!(&classification[8..11], &[finals.building; 3]);
        assert_eq!(classification[11], 1);
    }

    #[test]
    fn confirmed_points_stay_confirmed() {
        let config = AppConfig::default();
        let finals = config.data_format.codes.final_codes;
        let mut store = prepared_store(&finals);
        let before: Vec<bool> = store
            .u8s("classification")
            .unwrap()
            .iter()
            .map(|&c| c == finals.building)
            .collect();
        completor(&config).run(&mut store).unwrap();
        let after = store.u8s("classification").unwrap();
        for (i, was_building) in before.iter().enumerate() {
            if *was_building {
                assert_eq!(after[i], finals.building);
            }
        }
    }

    #[test]
    fn groups_without_confirmed_points_are_left_alone() {
        let config = AppConfig::default();
        let finals = config.data_format.codes.final_codes;
        let mut store = prepared_store(&finals);
        // Erase the confirmed block: everything becomes plain ground
        store
            .insert_column("classification", Column::U8(vec![1; 12]))
            .unwrap();
        completor(&config).run(&mut store).unwrap();
        assert!(store.u8s("completion_flag").unwrap().iter().all(|&f| f == 0));
        assert!(store
            .u8s("classification")
            .unwrap()
            .iter()
            .all(|&c| c != finals.building));
    }

    #[test]
    fn generic_cluster_slot_is_reset() {
        let config = AppConfig::default();
        let finals = config.data_format.codes.final_codes;
        let mut store = prepared_store(&finals);
        completor(&config).run(&mut store).unwrap();
        assert!(store.u32s("cluster_id").unwrap().iter().all(|&id| id == 0));
        let completion_ids = store.u32s("completion_cluster_id").unwrap();
        assert!(completion_ids[..11].iter().all(|&id| id > 0));
        assert_eq!(completion_ids[11], 0);
    }
}

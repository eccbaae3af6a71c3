//! Dimension cleaning: keep only the configured extra dimensions.
//!
//! Standard LAS dimensions always survive. Used standalone through the
//! `cleaning` task and by the driver to trim tiles before and after the
//! pipeline.

use tracing::debug;

use crate::config::defaults::is_extra_dimension;
use crate::store::PointStore;

pub struct Cleaner {
    extra_dims: Vec<String>,
}

impl Cleaner {
    pub fn new(extra_dims: &[String]) -> Self {
        Self {
            extra_dims: extra_dims.to_vec(),
        }
    }

    /// Drop every extra dimension not in the keep-list.
    pub fn run(&self, store: &mut PointStore) {
        let before = store.dimension_names().len();
        store.retain_columns(&self.extra_dims, is_extra_dimension);
        let after = store.dimension_names().len();
        debug!(dropped = before - after, kept = after, "dimension cleaning done");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Column, DimType};

    #[test]
    fn keeps_standard_and_listed_dimensions() {
        let mut store = PointStore::with_len(2);
        store.insert_column("x", Column::F64(vec![0.0, 1.0])).unwrap();
        store
            .insert_column("classification", Column::U8(vec![1, 2]))
            .unwrap();
        store.add_dimension("building_proba", DimType::F32);
        store.add_dimension("entropy", DimType::F32);
        store.add_dimension("candidate_flag", DimType::U8);

        Cleaner::new(&["building_proba".to_string()]).run(&mut store);

        assert!(store.has_dimension("x"));
        assert!(store.has_dimension("classification"));
        assert!(store.has_dimension("building_proba"));
        assert!(!store.has_dimension("entropy"));
        assert!(!store.has_dimension("candidate_flag"));
    }

    #[test]
    fn empty_keep_list_strips_all_extras() {
        let mut store = PointStore::with_len(1);
        store.insert_column("x", Column::F64(vec![0.0])).unwrap();
        store.add_dimension("building_proba", DimType::F32);
        Cleaner::new(&[]).run(&mut store);
        assert_eq!(store.dimension_names(), &["x".to_string()]);
    }
}

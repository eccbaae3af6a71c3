//! Euclidean clustering of predicate-selected points.
//!
//! Groups points into connected components under a distance tolerance, in 2D
//! (XY) or 3D. Components of at least `min_points` members receive ids
//! starting at 1 in discovery order; every other point, including members of
//! undersized components, keeps id 0. Consumers must not rely on specific id
//! values, only on the 0 / nonzero distinction and on component membership.

use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

use crate::store::{PointStore, StoreError};

/// Clustering parameters, per stage, from configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClusterParams {
    /// Smallest component that receives a nonzero id.
    pub min_points: usize,
    /// Maximum Euclidean distance between neighbors of one component (meters).
    pub tolerance: f64,
    /// Cluster in 3D when true, otherwise on XY only.
    pub is3d: bool,
}

/// Result of a clustering pass: per-point ids and the number of components.
#[derive(Debug, Clone)]
pub struct ClusterLabels {
    pub ids: Vec<u32>,
    pub count: u32,
}

/// Compute connected-component ids for every point satisfying `pred`.
///
/// Reads the `x`/`y`(/`z`) columns; does not mutate the store. An empty
/// selection yields all-zero ids.
pub fn compute_clusters<F>(
    store: &PointStore,
    params: &ClusterParams,
    pred: F,
) -> Result<ClusterLabels, StoreError>
where
    F: Fn(usize) -> bool,
{
    let selected: Vec<usize> = (0..store.len()).filter(|&i| pred(i)).collect();
    if selected.is_empty() {
        return Ok(ClusterLabels {
            ids: vec![0; store.len()],
            count: 0,
        });
    }

    let xs = store.f64s("x")?;
    let ys = store.f64s("y")?;
    if params.is3d {
        let zs = store.f64s("z")?;
        Ok(label_components_3d(store.len(), &selected, xs, ys, zs, params))
    } else {
        Ok(label_components_2d(store.len(), &selected, xs, ys, params))
    }
}

fn label_components_2d(
    len: usize,
    selected: &[usize],
    xs: &[f64],
    ys: &[f64],
    params: &ClusterParams,
) -> ClusterLabels {
    let tree: RTree<GeomWithData<[f64; 2], usize>> = RTree::bulk_load(
        selected
            .iter()
            .map(|&i| GeomWithData::new([xs[i], ys[i]], i))
            .collect(),
    );
    let tol2 = params.tolerance * params.tolerance;

    let mut ids = vec![0u32; len];
    let mut visited = vec![false; len];
    let mut count = 0u32;
    for &seed in selected {
        if visited[seed] {
            continue;
        }
        // BFS expansion through the R-tree neighborhood query
        let mut component = vec![seed];
        visited[seed] = true;
        let mut cursor = 0;
        while cursor < component.len() {
            let here = component[cursor];
            cursor += 1;
            for neighbor in tree.locate_within_distance([xs[here], ys[here]], tol2) {
                let j = neighbor.data;
                if !visited[j] {
                    visited[j] = true;
                    component.push(j);
                }
            }
        }
        if component.len() >= params.min_points {
            count += 1;
            for i in component {
                ids[i] = count;
            }
        }
    }
    ClusterLabels { ids, count }
}

fn label_components_3d(
    len: usize,
    selected: &[usize],
    xs: &[f64],
    ys: &[f64],
    zs: &[f64],
    params: &ClusterParams,
) -> ClusterLabels {
    let tree: RTree<GeomWithData<[f64; 3], usize>> = RTree::bulk_load(
        selected
            .iter()
            .map(|&i| GeomWithData::new([xs[i], ys[i], zs[i]], i))
            .collect(),
    );
    let tol2 = params.tolerance * params.tolerance;

    let mut ids = vec![0u32; len];
    let mut visited = vec![false; len];
    let mut count = 0u32;
    for &seed in selected {
        if visited[seed] {
            continue;
        }
        let mut component = vec![seed];
        visited[seed] = true;
        let mut cursor = 0;
        while cursor < component.len() {
            let here = component[cursor];
            cursor += 1;
            for neighbor in tree.locate_within_distance([xs[here], ys[here], zs[here]], tol2) {
                let j = neighbor.data;
                if !visited[j] {
                    visited[j] = true;
                    component.push(j);
                }
            }
        }
        if component.len() >= params.min_points {
            count += 1;
            for i in component {
                ids[i] = count;
            }
        }
    }
    ClusterLabels { ids, count }
}

/// Move cluster ids from the generic slot into a stage-owned dimension and
/// reset the slot to 0, so the next stage cannot inherit stale ids.
pub fn relocate_ids(store: &mut PointStore, src: &str, dst: &str) -> Result<(), StoreError> {
    let ids = store.u32s(src)?.to_vec();
    store.add_dimension(dst, crate::store::DimType::U32);
    store.u32s_mut(dst)?.copy_from_slice(&ids);
    store.fill(src, 0.0)
}

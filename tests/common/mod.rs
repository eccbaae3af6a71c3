//! Shared fixtures for the integration tests: a synthetic tile with known
//! cluster structure, and an in-memory footprint source.

#![allow(dead_code)]

use geo::polygon;
use lidar_forge::footprint::{Bbox, FootprintError, FootprintSource, PolygonSet};
use lidar_forge::store::{Column, PointStore};

/// Footprints served straight from memory.
pub struct MemoryFootprints {
    polygons: PolygonSet,
}

impl MemoryFootprints {
    pub fn new(polygons: PolygonSet) -> Self {
        Self { polygons }
    }

    pub fn empty() -> Self {
        Self {
            polygons: PolygonSet::empty(),
        }
    }
}

impl FootprintSource for MemoryFootprints {
    fn fetch(&self, _bbox: &Bbox, _epsg: u32) -> Result<PolygonSet, FootprintError> {
        Ok(self.polygons.clone())
    }
}

/// A square footprint covering the confirmed cluster of
/// [`synthetic_tile_store`].
pub fn footprint_over_cluster_a() -> PolygonSet {
    PolygonSet::from_polygons(vec![polygon![
        (x: -1.0, y: -1.0),
        (x: 6.0, y: -1.0),
        (x: 6.0, y: 1.0),
        (x: -1.0, y: 1.0),
    ]])
    .dissolve()
}

/// Index ranges of the synthetic tile regions.
pub const CLUSTER_A: std::ops::Range<usize> = 0..12;
pub const CLUSTER_B: std::ops::Range<usize> = 12..24;
pub const COMPLETION_POINTS: std::ops::Range<usize> = 24..27;
pub const MISSED_BUILDING: std::ops::Range<usize> = 27..87;
pub const GROUND: std::ops::Range<usize> = 87..107;

/// Synthetic tile with four regions:
///
/// - cluster A: 12 candidate points (code 202) under a footprint,
///   probability 0.95 — should be confirmed;
/// - cluster B: 12 candidate points far away, probability 0.05 — should be
///   refuted;
/// - 3 non-candidate points adjacent to cluster A with probability 0.9 —
///   completion fodder;
/// - 60 non-candidate points with probability 0.9 in their own block —
///   identification fodder;
/// - 20 scattered ground points (code 2), probability 0.
pub fn synthetic_tile_store() -> PointStore {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut classification = Vec::new();
    let mut probabilities = Vec::new();

    // Cluster A at y=0, x = 0.0 .. 4.4
    for i in 0..12 {
        xs.push(f64::from(i) * 0.4);
        ys.push(0.0);
        classification.push(202u8);
        probabilities.push(0.95f32);
    }
    // Cluster B at y=0, x = 50.0 .. 54.4
    for i in 0..12 {
        xs.push(50.0 + f64::from(i) * 0.4);
        ys.push(0.0);
        classification.push(202);
        probabilities.push(0.05);
    }
    // Completion points continue cluster A eastward
    for i in 0..3 {
        xs.push(4.8 + f64::from(i) * 0.4);
        ys.push(0.0);
        classification.push(1);
        probabilities.push(0.9);
    }
    // Missed building block at y=100
    for i in 0..60 {
        xs.push(f64::from(i) * 0.4);
        ys.push(100.0);
        classification.push(1);
        probabilities.push(0.9);
    }
    // Scattered ground at y=50, 5 m apart
    for i in 0..20 {
        xs.push(f64::from(i) * 5.0);
        ys.push(50.0);
        classification.push(2);
        probabilities.push(0.0);
    }

    let n = xs.len();
    let mut store = PointStore::with_len(n);
    store.insert_column("x", Column::F64(xs)).unwrap();
    store.insert_column("y", Column::F64(ys)).unwrap();
    store.insert_column("z", Column::F64(vec![5.0; n])).unwrap();
    store
        .insert_column("classification", Column::U8(classification))
        .unwrap();
    store
        .insert_column("building_proba", Column::F32(probabilities))
        .unwrap();
    store
        .insert_column("entropy", Column::F32(vec![0.1; n]))
        .unwrap();
    store
}

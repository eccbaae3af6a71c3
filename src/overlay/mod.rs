//! Footprint overlay: flag points whose XY falls inside a known building.
//!
//! Candidate polygon parts are found through an envelope R-tree, then the
//! exact containment test runs against the part geometry, so the pass stays
//! near O((N + M) log M) for N points and M parts.

use geo::{BoundingRect, Contains};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use thiserror::Error;
use tracing::debug;

use crate::footprint::PolygonSet;
use crate::store::{DimType, PointStore, StoreError};

#[derive(Error, Debug)]
pub enum OverlayError {
    /// The polygon set was not dissolved. Overlapping parts would double-count
    /// points and have previously made the overlay hang; refusing the set is
    /// the contract.
    #[error("polygon set must be dissolved before overlay")]
    InvalidPolygonSet,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Write 1 into `out_dim` for every point whose XY lies inside any polygon
/// part, 0 elsewhere. The output dimension is created even when the polygon
/// set is empty.
pub fn flag_overlayed_points(
    store: &mut PointStore,
    polygons: &PolygonSet,
    out_dim: &str,
) -> Result<(), OverlayError> {
    if !polygons.is_dissolved() {
        return Err(OverlayError::InvalidPolygonSet);
    }

    store.add_dimension(out_dim, DimType::U8);
    if polygons.is_empty() || store.is_empty() {
        store.fill(out_dim, 0.0)?;
        return Ok(());
    }

    let envelopes: Vec<GeomWithData<Rectangle<[f64; 2]>, usize>> = polygons
        .parts()
        .iter()
        .enumerate()
        .filter_map(|(idx, part)| {
            part.bounding_rect().map(|r| {
                GeomWithData::new(
                    Rectangle::from_corners([r.min().x, r.min().y], [r.max().x, r.max().y]),
                    idx,
                )
            })
        })
        .collect();
    let tree = RTree::bulk_load(envelopes);

    let flags: Vec<u8> = {
        let xs = store.f64s("x")?;
        let ys = store.f64s("y")?;
        (0..store.len())
            .map(|i| {
                let probe = geo::Point::new(xs[i], ys[i]);
                let hit = tree
                    .locate_in_envelope_intersecting(&AABB::from_point([xs[i], ys[i]]))
                    .any(|env| polygons.parts()[env.data].contains(&probe));
                u8::from(hit)
            })
            .collect()
    };

    let marked = flags.iter().filter(|&&f| f == 1).count();
    store.u8s_mut(out_dim)?.copy_from_slice(&flags);
    debug!(marked, total = store.len(), "footprint overlay done");
    Ok(())
}

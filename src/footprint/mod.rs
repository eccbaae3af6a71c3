//! Building footprints from a vector database.
//!
//! A `FootprintSource` answers one question per tile: which known-building
//! polygons intersect this bbox? The production deployment answers it with a
//! live SQL query against the national topographic database (an external
//! client implementing [`FootprintSource`]); this crate ships the on-disk
//! shapefile implementation used for replays, tests and air-gapped runs.
//!
//! Whatever the source, the returned polygon set is **dissolved**: overlapping
//! footprints are unioned into disjoint parts before the overlay stage sees
//! them. Undissolved sets have made the overlay mis-count in the past, so the
//! overlay refuses them outright.

use std::path::{Path, PathBuf};

use geo::{BooleanOps, BoundingRect, Intersects, MultiPolygon, Polygon, Rect};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from footprint retrieval. Both are external conditions: the driver
/// fails the tile and moves on.
#[derive(Error, Debug)]
pub enum FootprintError {
    #[error("footprint source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("CRS mismatch: requested EPSG:{requested}, source provides EPSG:{available}")]
    CrsMismatch { requested: u32, available: u32 },
}

/// Integer XY bbox of a footprint request, already buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bbox {
    pub x_min: i64,
    pub y_min: i64,
    pub x_max: i64,
    pub y_max: i64,
}

impl Bbox {
    pub fn new(x_min: i64, y_min: i64, x_max: i64, y_max: i64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    fn as_rect(&self) -> Rect<f64> {
        Rect::new(
            geo::coord! { x: self.x_min as f64, y: self.y_min as f64 },
            geo::coord! { x: self.x_max as f64, y: self.y_max as f64 },
        )
    }
}

/// An unordered set of footprint polygons for one bbox query.
///
/// Tracks whether the set has been dissolved; the overlay stage requires it.
#[derive(Debug, Clone)]
pub struct PolygonSet {
    parts: MultiPolygon<f64>,
    dissolved: bool,
}

impl PolygonSet {
    /// The empty set, trivially dissolved.
    pub fn empty() -> Self {
        Self {
            parts: MultiPolygon::new(Vec::new()),
            dissolved: true,
        }
    }

    /// Wrap raw polygons as returned by a source, not yet dissolved.
    pub fn from_polygons(polygons: Vec<Polygon<f64>>) -> Self {
        let dissolved = polygons.len() <= 1;
        Self {
            parts: MultiPolygon::new(polygons),
            dissolved,
        }
    }

    /// Union all parts into disjoint polygons.
    pub fn dissolve(self) -> Self {
        if self.dissolved {
            return self;
        }
        let mut union = MultiPolygon::new(Vec::new());
        for polygon in &self.parts {
            union = union.union(&MultiPolygon::new(vec![polygon.clone()]));
        }
        Self {
            parts: union,
            dissolved: true,
        }
    }

    pub fn is_dissolved(&self) -> bool {
        self.dissolved
    }

    pub fn is_empty(&self) -> bool {
        self.parts.0.is_empty()
    }

    /// Number of disjoint parts.
    pub fn len(&self) -> usize {
        self.parts.0.len()
    }

    pub fn parts(&self) -> &[Polygon<f64>] {
        &self.parts.0
    }
}

/// Per-tile footprint retrieval.
///
/// Implementations must return the polygons in the requested CRS, dissolved,
/// and an empty set (not an error) when nothing intersects the bbox.
pub trait FootprintSource {
    fn fetch(&self, bbox: &Bbox, epsg: u32) -> Result<PolygonSet, FootprintError>;
}

/// Footprints loaded from a shapefile on disk.
///
/// The file carries no machine-readable CRS, so the EPSG it was exported in
/// is part of the configuration; requests in any other CRS are refused.
#[derive(Debug, Clone)]
pub struct ShapefileFootprints {
    path: PathBuf,
    epsg: u32,
}

impl ShapefileFootprints {
    pub fn new(path: impl AsRef<Path>, epsg: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            epsg,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FootprintSource for ShapefileFootprints {
    fn fetch(&self, bbox: &Bbox, epsg: u32) -> Result<PolygonSet, FootprintError> {
        if epsg != self.epsg {
            return Err(FootprintError::CrsMismatch {
                requested: epsg,
                available: self.epsg,
            });
        }

        let shapes = shapefile::read_shapes(&self.path).map_err(|e| {
            FootprintError::SourceUnavailable(format!("{}: {e}", self.path.display()))
        })?;

        let window = bbox.as_rect();
        let mut polygons: Vec<Polygon<f64>> = Vec::new();
        for shape in shapes {
            let multi: MultiPolygon<f64> = match shape {
                shapefile::Shape::Polygon(p) => p.into(),
                // Footprint layers only carry polygons; skip stray geometries.
                _ => continue,
            };
            for polygon in multi {
                let intersects = polygon
                    .bounding_rect()
                    .is_some_and(|r| r.intersects(&window))
                    && polygon.intersects(&window);
                if intersects {
                    polygons.push(polygon);
                }
            }
        }

        if polygons.is_empty() {
            debug!(path = %self.path.display(), "no footprints intersect the tile bbox");
            return Ok(PolygonSet::empty());
        }

        let set = PolygonSet::from_polygons(polygons).dissolve();
        info!(
            path = %self.path.display(),
            parts = set.len(),
            "loaded building footprints"
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn unit_square(x0: f64, y0: f64, side: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + side, y: y0),
            (x: x0 + side, y: y0 + side),
            (x: x0, y: y0 + side),
        ]
    }

    #[test]
    fn empty_set_is_dissolved() {
        let set = PolygonSet::empty();
        assert!(set.is_dissolved());
        assert!(set.is_empty());
    }

    #[test]
    fn overlapping_polygons_dissolve_to_one_part() {
        let set = PolygonSet::from_polygons(vec![
            unit_square(0.0, 0.0, 2.0),
            unit_square(1.0, 0.0, 2.0),
        ]);
        assert!(!set.is_dissolved());
        let set = set.dissolve();
        assert!(set.is_dissolved());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn disjoint_polygons_stay_separate_parts() {
        let set = PolygonSet::from_polygons(vec![
            unit_square(0.0, 0.0, 1.0),
            unit_square(10.0, 0.0, 1.0),
        ])
        .dissolve();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn shapefile_source_rejects_wrong_crs() {
        let source = ShapefileFootprints::new("does_not_matter.shp", 2154);
        let err = source.fetch(&Bbox::new(0, 0, 1, 1), 5490).unwrap_err();
        assert!(matches!(
            err,
            FootprintError::CrsMismatch {
                requested: 5490,
                available: 2154
            }
        ));
    }

    #[test]
    fn missing_shapefile_is_source_unavailable() {
        let source = ShapefileFootprints::new("/nonexistent/buildings.shp", 2154);
        let err = source.fetch(&Bbox::new(0, 0, 1, 1), 2154).unwrap_err();
        assert!(matches!(err, FootprintError::SourceUnavailable(_)));
    }
}

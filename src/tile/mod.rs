//! Tile I/O: LAS/LAZ files to and from the in-memory point store.
//!
//! The reader maps every standard dimension plus every extra-bytes dimension
//! into named store columns. The writer forwards the source spatial reference
//! (VLRs) and scale/offset, keeps key dimensions bit-exact, and rebuilds the
//! extra-bytes descriptors from the store's extra columns in column order.
//! Pre-1.4 sources are upgraded to LAS 1.4 / point format 8 so the extended
//! classification codes fit; 1.4 sources keep their own point format.

mod extra_bytes;

pub use extra_bytes::{ExtraBytesLayout, ExtraDimension};

use std::path::{Path, PathBuf};

use las::{Builder, Reader, Writer};
use thiserror::Error;
use tracing::debug;

use crate::store::{Column, PointStore, StoreError};

#[derive(Error, Debug)]
pub enum TileIoError {
    #[error("LAS error on {0}: {1}")]
    Las(PathBuf, #[source] las::Error),

    #[error("I/O error on {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("unsupported extra-bytes data type {data_type} for dimension {name}")]
    UnsupportedExtraBytes { name: String, data_type: u8 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Source-tile metadata carried from reader to writer so the output keeps the
/// input's header lineage (version, SRS VLRs, scale/offset).
#[derive(Debug, Clone)]
pub struct TileMeta {
    header: las::Header,
}

impl TileMeta {
    /// Metadata for a tile produced from scratch rather than read from disk.
    pub fn new(header: las::Header) -> Self {
        Self { header }
    }

    pub fn header(&self) -> &las::Header {
        &self.header
    }
}

/// Read a LAS/LAZ tile into a point store.
pub fn read_tile(path: &Path) -> Result<(PointStore, TileMeta), TileIoError> {
    let mut reader =
        Reader::from_path(path).map_err(|e| TileIoError::Las(path.to_path_buf(), e))?;
    let header = reader.header().clone();
    let n = header.number_of_points() as usize;
    let format = *header.point_format();
    let layout = ExtraBytesLayout::from_vlrs(header.vlrs())?;

    let mut store = PointStore::with_len(n);
    layout.prepare_columns(&mut store);

    let mut xs = vec![0.0f64; n];
    let mut ys = vec![0.0f64; n];
    let mut zs = vec![0.0f64; n];
    let mut intensities = vec![0u16; n];
    let mut return_numbers = vec![0u8; n];
    let mut numbers_of_returns = vec![0u8; n];
    let mut classifications = vec![0u8; n];
    let mut scan_angles = vec![0.0f32; n];
    let mut point_source_ids = vec![0u16; n];
    let mut gps_times = format.has_gps_time.then(|| vec![0.0f64; n]);
    let mut colors = format.has_color.then(|| {
        (vec![0u16; n], vec![0u16; n], vec![0u16; n])
    });
    let mut nirs = format.has_nir.then(|| vec![0u16; n]);

    for (i, point) in reader.points().enumerate() {
        let point = point.map_err(|e| TileIoError::Las(path.to_path_buf(), e))?;
        xs[i] = point.x;
        ys[i] = point.y;
        zs[i] = point.z;
        intensities[i] = point.intensity;
        return_numbers[i] = point.return_number;
        numbers_of_returns[i] = point.number_of_returns;
        classifications[i] = u8::from(point.classification);
        scan_angles[i] = point.scan_angle;
        point_source_ids[i] = point.point_source_id;
        if let (Some(times), Some(t)) = (gps_times.as_mut(), point.gps_time) {
            times[i] = t;
        }
        if let (Some((reds, greens, blues)), Some(c)) = (colors.as_mut(), point.color) {
            reds[i] = c.red;
            greens[i] = c.green;
            blues[i] = c.blue;
        }
        if let (Some(values), Some(v)) = (nirs.as_mut(), point.nir) {
            values[i] = v;
        }
        if !layout.is_empty() {
            layout.decode_into(&mut store, i, &point.extra_bytes)?;
        }
    }

    store.insert_column("x", Column::F64(xs))?;
    store.insert_column("y", Column::F64(ys))?;
    store.insert_column("z", Column::F64(zs))?;
    store.insert_column("intensity", Column::U16(intensities))?;
    store.insert_column("return_number", Column::U8(return_numbers))?;
    store.insert_column("number_of_returns", Column::U8(numbers_of_returns))?;
    store.insert_column("classification", Column::U8(classifications))?;
    store.insert_column("scan_angle", Column::F32(scan_angles))?;
    store.insert_column("point_source_id", Column::U16(point_source_ids))?;
    if let Some(times) = gps_times {
        store.insert_column("gps_time", Column::F64(times))?;
    }
    if let Some((reds, greens, blues)) = colors {
        store.insert_column("red", Column::U16(reds))?;
        store.insert_column("green", Column::U16(greens))?;
        store.insert_column("blue", Column::U16(blues))?;
    }
    if let Some(values) = nirs {
        store.insert_column("nir", Column::U16(values))?;
    }

    debug!(path = %path.display(), points = n, extra_dims = layout.dims().len(), "tile read");
    Ok((store, TileMeta { header }))
}

/// List the LAS/LAZ tiles of a directory, sorted by file name. A single-file
/// path is returned as-is.
pub fn discover_tiles(path: &Path) -> Result<Vec<PathBuf>, TileIoError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let entries =
        std::fs::read_dir(path).map_err(|e| TileIoError::Io(path.to_path_buf(), e))?;
    let mut tiles: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("las") || ext.eq_ignore_ascii_case("laz"))
        })
        .collect();
    tiles.sort();
    Ok(tiles)
}

/// Write a point store as LAS/LAZ (decided by the extension of `path`).
pub fn write_tile(store: &PointStore, meta: &TileMeta, path: &Path) -> Result<(), TileIoError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TileIoError::Io(path.to_path_buf(), e))?;
    }

    let layout = ExtraBytesLayout::from_store(store);
    let las_err = |e: las::Error| TileIoError::Las(path.to_path_buf(), e);

    let source_format = *meta.header.point_format();
    let (version, mut format) = if source_format.is_extended {
        (meta.header.version(), source_format)
    } else {
        // Extended classification codes need LAS 1.4 point formats
        (
            las::Version::new(1, 4),
            las::point::Format::new(8).map_err(las_err)?,
        )
    };
    format.extra_bytes = layout.total_size() as u16;

    let mut builder = Builder::from((version.major, version.minor));
    builder.point_format = format;
    builder.transforms = meta.header.transforms().clone();
    for vlr in meta.header.vlrs() {
        let user_id = vlr.user_id.trim_end_matches('\0');
        let is_extra_bytes = user_id == extra_bytes::EXTRA_BYTES_USER_ID
            && vlr.record_id == extra_bytes::EXTRA_BYTES_RECORD_ID;
        let is_laszip = user_id == "laszip encoded";
        if is_extra_bytes || is_laszip {
            continue;
        }
        builder.vlrs.push(vlr.clone());
    }
    if !layout.is_empty() {
        builder.vlrs.push(layout.to_vlr());
    }
    let header = builder.into_header().map_err(las_err)?;
    let mut writer = Writer::from_path(path, header).map_err(las_err)?;

    let xs = store.f64s("x")?;
    let ys = store.f64s("y")?;
    let zs = store.f64s("z")?;
    let intensities = store.u16s("intensity").ok();
    let return_numbers = store.u8s("return_number").ok();
    let numbers_of_returns = store.u8s("number_of_returns").ok();
    let classifications = store.u8s("classification")?;
    let scan_angles = store.f32s("scan_angle").ok();
    let point_source_ids = store.u16s("point_source_id").ok();
    let gps_times = store.f64s("gps_time").ok();
    let reds = store.u16s("red").ok();
    let greens = store.u16s("green").ok();
    let blues = store.u16s("blue").ok();
    let nirs = store.u16s("nir").ok();

    let mut payload = vec![0u8; layout.total_size()];
    for i in 0..store.len() {
        let mut point = las::Point {
            x: xs[i],
            y: ys[i],
            z: zs[i],
            ..Default::default()
        };
        if let Some(values) = intensities {
            point.intensity = values[i];
        }
        if let Some(values) = return_numbers {
            point.return_number = values[i];
        }
        if let Some(values) = numbers_of_returns {
            point.number_of_returns = values[i];
        }
        point.classification =
            las::point::Classification::new(classifications[i]).map_err(las_err)?;
        if let Some(values) = scan_angles {
            point.scan_angle = values[i];
        }
        if let Some(values) = point_source_ids {
            point.point_source_id = values[i];
        }
        if format.has_gps_time {
            point.gps_time = Some(gps_times.map_or(0.0, |values| values[i]));
        }
        if format.has_color {
            point.color = Some(las::Color::new(
                reds.map_or(0, |values| values[i]),
                greens.map_or(0, |values| values[i]),
                blues.map_or(0, |values| values[i]),
            ));
        }
        if format.has_nir {
            point.nir = Some(nirs.map_or(0, |values| values[i]));
        }
        if !layout.is_empty() {
            layout.encode_from(store, i, &mut payload)?;
            point.extra_bytes = payload.clone();
        }
        writer.write_point(point).map_err(las_err)?;
    }
    writer.close().map_err(las_err)?;
    debug!(path = %path.display(), points = store.len(), "tile written");
    Ok(())
}

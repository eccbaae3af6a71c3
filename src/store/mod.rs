//! In-memory tile storage.
//!
//! A tile is held as parallel typed arrays ("dimensions") addressed by name,
//! one entry per point. Coordinates, the classification channel and the model
//! outputs arrive from the tile reader; the pipeline stages add their own work
//! dimensions (flags and cluster ids) on first write. Dimension order is
//! preserved so the tile writer can forward columns in a stable layout.

use std::collections::HashMap;

use thiserror::Error;

/// Errors raised by dimension access.
///
/// Both variants are programmer errors: stages agree on dimension names and
/// types through configuration, so hitting one of these means a stage wiring
/// bug, not a recoverable data condition.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown dimension: {0}")]
    UnknownDimension(String),

    #[error("dimension {name} holds {actual} values, requested {requested}")]
    DimensionTypeMismatch {
        name: String,
        requested: DimType,
        actual: DimType,
    },

    #[error("column {name} has {len} values for a store of {expected} points")]
    LengthMismatch {
        name: String,
        len: usize,
        expected: usize,
    },
}

/// Element type of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimType {
    U8,
    U16,
    U32,
    F32,
    F64,
}

impl std::fmt::Display for DimType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DimType::U8 => "u8",
            DimType::U16 => "u16",
            DimType::U32 => "u32",
            DimType::F32 => "f32",
            DimType::F64 => "f64",
        };
        write!(f, "{name}")
    }
}

/// A single dimension: one value per point.
#[derive(Debug, Clone)]
pub enum Column {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Column {
    /// Zero-filled column of the given type.
    pub fn zeros(ty: DimType, len: usize) -> Self {
        match ty {
            DimType::U8 => Column::U8(vec![0; len]),
            DimType::U16 => Column::U16(vec![0; len]),
            DimType::U32 => Column::U32(vec![0; len]),
            DimType::F32 => Column::F32(vec![0.0; len]),
            DimType::F64 => Column::F64(vec![0.0; len]),
        }
    }

    pub fn dim_type(&self) -> DimType {
        match self {
            Column::U8(_) => DimType::U8,
            Column::U16(_) => DimType::U16,
            Column::U32(_) => DimType::U32,
            Column::F32(_) => DimType::F32,
            Column::F64(_) => DimType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::U8(v) => v.len(),
            Column::U16(v) => v.len(),
            Column::U32(v) => v.len(),
            Column::F32(v) => v.len(),
            Column::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric read of one element, widened to f64.
    pub fn get_f64(&self, idx: usize) -> f64 {
        match self {
            Column::U8(v) => f64::from(v[idx]),
            Column::U16(v) => f64::from(v[idx]),
            Column::U32(v) => f64::from(v[idx]),
            Column::F32(v) => f64::from(v[idx]),
            Column::F64(v) => v[idx],
        }
    }

    /// Numeric write of one element, narrowed from f64 to the column type.
    pub fn set_f64(&mut self, idx: usize, value: f64) {
        match self {
            Column::U8(v) => v[idx] = value as u8,
            Column::U16(v) => v[idx] = value as u16,
            Column::U32(v) => v[idx] = value as u32,
            Column::F32(v) => v[idx] = value as f32,
            Column::F64(v) => v[idx] = value,
        }
    }
}

/// XY(Z) extent of a store, in the tile's coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub min_z: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
}

impl Bounds {
    /// Integer-snapped XY bbox expanded by `buffer` meters: floor on minima,
    /// ceil on maxima. This is the shape footprint requests expect.
    pub fn buffered_int_xy(&self, buffer: f64) -> (i64, i64, i64, i64) {
        (
            (self.min_x - buffer).floor() as i64,
            (self.min_y - buffer).floor() as i64,
            (self.max_x + buffer).ceil() as i64,
            (self.max_y + buffer).ceil() as i64,
        )
    }
}

/// A tile as a dictionary of typed columns.
///
/// Columns keep their insertion order; `x`, `y` and `z` are ordinary columns
/// inserted first by the tile reader. Lives for the duration of one tile's
/// pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PointStore {
    len: usize,
    order: Vec<String>,
    columns: HashMap<String, Column>,
}

impl PointStore {
    /// Empty store for `len` points; columns are added afterwards.
    pub fn with_len(len: usize) -> Self {
        Self {
            len,
            order: Vec::new(),
            columns: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Dimension names in insertion order.
    pub fn dimension_names(&self) -> &[String] {
        &self.order
    }

    pub fn has_dimension(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn dim_type(&self, name: &str) -> Option<DimType> {
        self.columns.get(name).map(Column::dim_type)
    }

    /// Create a zero-filled dimension. No-op if the name already exists,
    /// whatever its type.
    pub fn add_dimension(&mut self, name: &str, ty: DimType) {
        if self.columns.contains_key(name) {
            return;
        }
        self.order.push(name.to_string());
        self.columns.insert(name.to_string(), Column::zeros(ty, self.len));
    }

    /// Insert a fully materialized column, replacing any previous one with
    /// the same name.
    pub fn insert_column(&mut self, name: &str, column: Column) -> Result<(), StoreError> {
        if column.len() != self.len {
            return Err(StoreError::LengthMismatch {
                name: name.to_string(),
                len: column.len(),
                expected: self.len,
            });
        }
        if !self.columns.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.columns.insert(name.to_string(), column);
        Ok(())
    }

    /// Drop a column. Unknown names are ignored.
    pub fn remove_dimension(&mut self, name: &str) {
        if self.columns.remove(name).is_some() {
            self.order.retain(|n| n != name);
        }
    }

    pub fn column(&self, name: &str) -> Result<&Column, StoreError> {
        self.columns
            .get(name)
            .ok_or_else(|| StoreError::UnknownDimension(name.to_string()))
    }

    pub fn column_mut(&mut self, name: &str) -> Result<&mut Column, StoreError> {
        self.columns
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownDimension(name.to_string()))
    }

    pub fn u8s(&self, name: &str) -> Result<&[u8], StoreError> {
        match self.column(name)? {
            Column::U8(v) => Ok(v),
            c => Err(type_mismatch(name, DimType::U8, c)),
        }
    }

    pub fn u8s_mut(&mut self, name: &str) -> Result<&mut [u8], StoreError> {
        match self.column_mut(name)? {
            Column::U8(v) => Ok(v),
            c => Err(type_mismatch(name, DimType::U8, c)),
        }
    }

    pub fn u16s(&self, name: &str) -> Result<&[u16], StoreError> {
        match self.column(name)? {
            Column::U16(v) => Ok(v),
            c => Err(type_mismatch(name, DimType::U16, c)),
        }
    }

    pub fn u16s_mut(&mut self, name: &str) -> Result<&mut [u16], StoreError> {
        match self.column_mut(name)? {
            Column::U16(v) => Ok(v),
            c => Err(type_mismatch(name, DimType::U16, c)),
        }
    }

    pub fn u32s(&self, name: &str) -> Result<&[u32], StoreError> {
        match self.column(name)? {
            Column::U32(v) => Ok(v),
            c => Err(type_mismatch(name, DimType::U32, c)),
        }
    }

    pub fn u32s_mut(&mut self, name: &str) -> Result<&mut [u32], StoreError> {
        match self.column_mut(name)? {
            Column::U32(v) => Ok(v),
            c => Err(type_mismatch(name, DimType::U32, c)),
        }
    }

    pub fn f32s(&self, name: &str) -> Result<&[f32], StoreError> {
        match self.column(name)? {
            Column::F32(v) => Ok(v),
            c => Err(type_mismatch(name, DimType::F32, c)),
        }
    }

    pub fn f32s_mut(&mut self, name: &str) -> Result<&mut [f32], StoreError> {
        match self.column_mut(name)? {
            Column::F32(v) => Ok(v),
            c => Err(type_mismatch(name, DimType::F32, c)),
        }
    }

    pub fn f64s(&self, name: &str) -> Result<&[f64], StoreError> {
        match self.column(name)? {
            Column::F64(v) => Ok(v),
            c => Err(type_mismatch(name, DimType::F64, c)),
        }
    }

    pub fn f64s_mut(&mut self, name: &str) -> Result<&mut [f64], StoreError> {
        match self.column_mut(name)? {
            Column::F64(v) => Ok(v),
            c => Err(type_mismatch(name, DimType::F64, c)),
        }
    }

    /// Numeric read of one value, widened to f64. Used by predicates that are
    /// written against dimension names rather than typed slices.
    pub fn value_as_f64(&self, name: &str, idx: usize) -> Result<f64, StoreError> {
        Ok(self.column(name)?.get_f64(idx))
    }

    /// Overwrite every element of a dimension with `value` (narrowed to the
    /// column type).
    pub fn fill(&mut self, name: &str, value: f64) -> Result<(), StoreError> {
        let col = self.column_mut(name)?;
        for idx in 0..col.len() {
            col.set_f64(idx, value);
        }
        Ok(())
    }

    /// Set `dim[i] = value` for every point where the predicate holds.
    ///
    /// The predicate is evaluated against the store without copying any
    /// column. The target dimension is detached while the predicate runs, so
    /// the predicate may reference any dimension except the one being
    /// written.
    pub fn assign_where<F>(&mut self, dim: &str, value: f64, pred: F) -> Result<(), StoreError>
    where
        F: Fn(&Self, usize) -> bool,
    {
        let mut col = self
            .columns
            .remove(dim)
            .ok_or_else(|| StoreError::UnknownDimension(dim.to_string()))?;
        for idx in 0..self.len {
            if pred(self, idx) {
                col.set_f64(idx, value);
            }
        }
        self.columns.insert(dim.to_string(), col);
        Ok(())
    }

    /// Stable partition of point indices by the integer value of `dim`,
    /// ordered by ascending key. The key-0 bucket, when present, is therefore
    /// always first; callers treat it as "unclustered" and skip it.
    pub fn group_by(&self, dim: &str) -> Result<Vec<(u32, Vec<usize>)>, StoreError> {
        let col = self.column(dim)?;
        let keys: Vec<u32> = match col {
            Column::U8(v) => v.iter().map(|&k| u32::from(k)).collect(),
            Column::U16(v) => v.iter().map(|&k| u32::from(k)).collect(),
            Column::U32(v) => v.clone(),
            c => {
                return Err(type_mismatch(dim, DimType::U32, c));
            }
        };
        let mut groups: std::collections::BTreeMap<u32, Vec<usize>> =
            std::collections::BTreeMap::new();
        for (idx, key) in keys.into_iter().enumerate() {
            groups.entry(key).or_default().push(idx);
        }
        Ok(groups.into_iter().collect())
    }

    /// XYZ extent. `None` for an empty store.
    pub fn bounds(&self) -> Result<Option<Bounds>, StoreError> {
        if self.len == 0 {
            return Ok(None);
        }
        let xs = self.f64s("x")?;
        let ys = self.f64s("y")?;
        let zs = self.f64s("z")?;
        let mut b = Bounds {
            min_x: xs[0],
            min_y: ys[0],
            min_z: zs[0],
            max_x: xs[0],
            max_y: ys[0],
            max_z: zs[0],
        };
        for i in 1..self.len {
            b.min_x = b.min_x.min(xs[i]);
            b.min_y = b.min_y.min(ys[i]);
            b.min_z = b.min_z.min(zs[i]);
            b.max_x = b.max_x.max(xs[i]);
            b.max_y = b.max_y.max(ys[i]);
            b.max_z = b.max_z.max(zs[i]);
        }
        Ok(Some(b))
    }

    /// Keep only the columns named in `keep` among those for which
    /// `is_candidate` holds; every other candidate column is dropped.
    /// Non-candidate columns (standard LAS dimensions) are always kept.
    pub fn retain_columns<F>(&mut self, keep: &[String], is_candidate: F)
    where
        F: Fn(&str) -> bool,
    {
        let doomed: Vec<String> = self
            .order
            .iter()
            .filter(|n| is_candidate(n) && !keep.iter().any(|k| k == *n))
            .cloned()
            .collect();
        for name in doomed {
            self.remove_dimension(&name);
        }
    }
}

fn type_mismatch(name: &str, requested: DimType, actual: &Column) -> StoreError {
    StoreError::DimensionTypeMismatch {
        name: name.to_string(),
        requested,
        actual: actual.dim_type(),
    }
}

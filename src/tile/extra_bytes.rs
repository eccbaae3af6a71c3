//! LAS Extra Bytes VLR handling.
//!
//! Extra dimensions (model probabilities, work flags, cluster ids) travel in
//! the per-point extra bytes, described by the `LASF_Spec` / record 4 VLR:
//! one 192-byte descriptor per dimension, in payload order.

use byteorder::{ByteOrder, LittleEndian};
use las::Vlr;

use crate::config::defaults::is_extra_dimension;
use crate::store::{DimType, PointStore};

use super::TileIoError;

/// VLR identifying the extra bytes descriptors.
pub const EXTRA_BYTES_USER_ID: &str = "LASF_Spec";
pub const EXTRA_BYTES_RECORD_ID: u16 = 4;

const DESCRIPTOR_SIZE: usize = 192;
const NAME_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;

/// One extra dimension inside the per-point payload.
#[derive(Debug, Clone)]
pub struct ExtraDimension {
    pub name: String,
    pub ty: DimType,
    /// Byte offset inside the extra-bytes payload
    pub offset: usize,
}

/// Parsed layout of the extra-bytes payload.
#[derive(Debug, Clone, Default)]
pub struct ExtraBytesLayout {
    dims: Vec<ExtraDimension>,
    total_size: usize,
}

fn data_type_of(ty: DimType) -> u8 {
    match ty {
        DimType::U8 => 1,
        DimType::U16 => 3,
        DimType::U32 => 5,
        DimType::F32 => 9,
        DimType::F64 => 10,
    }
}

fn dim_type_of(data_type: u8) -> Option<DimType> {
    match data_type {
        1 => Some(DimType::U8),
        3 => Some(DimType::U16),
        5 => Some(DimType::U32),
        9 => Some(DimType::F32),
        10 => Some(DimType::F64),
        _ => None,
    }
}

/// Payload size of a descriptor data type, for the full standard range.
fn size_of_data_type(data_type: u8) -> Option<usize> {
    match data_type {
        1 | 2 => Some(1),
        3 | 4 => Some(2),
        5 | 6 | 9 => Some(4),
        7 | 8 | 10 => Some(8),
        _ => None,
    }
}

impl ExtraBytesLayout {
    pub fn dims(&self) -> &[ExtraDimension] {
        &self.dims
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Parse the extra-bytes VLR, if any. Descriptors whose type the store
    /// cannot hold (signed and 64-bit integers) keep their place in the
    /// payload but yield no dimension.
    pub fn from_vlrs(vlrs: &[Vlr]) -> Result<Self, TileIoError> {
        let Some(vlr) = vlrs.iter().find(|v| {
            v.user_id.trim_end_matches('\0') == EXTRA_BYTES_USER_ID
                && v.record_id == EXTRA_BYTES_RECORD_ID
        }) else {
            return Ok(Self::default());
        };

        let mut layout = Self::default();
        for descriptor in vlr.data.chunks_exact(DESCRIPTOR_SIZE) {
            let data_type = descriptor[2];
            let raw_name = &descriptor[NAME_OFFSET..NAME_OFFSET + NAME_SIZE];
            let end = raw_name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
            let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();

            let size = size_of_data_type(data_type)
                .ok_or(TileIoError::UnsupportedExtraBytes { name: name.clone(), data_type })?;
            if let Some(ty) = dim_type_of(data_type) {
                layout.dims.push(ExtraDimension {
                    name,
                    ty,
                    offset: layout.total_size,
                });
            }
            layout.total_size += size;
        }
        Ok(layout)
    }

    /// Layout for the extra columns of a store, in column order.
    pub fn from_store(store: &PointStore) -> Self {
        let mut layout = Self::default();
        for name in store.dimension_names() {
            if !is_extra_dimension(name) {
                continue;
            }
            let Some(ty) = store.dim_type(name) else {
                continue;
            };
            let size = size_of_data_type(data_type_of(ty)).unwrap_or(0);
            layout.dims.push(ExtraDimension {
                name: name.clone(),
                ty,
                offset: layout.total_size,
            });
            layout.total_size += size;
        }
        layout
    }

    /// Build the descriptor VLR for this layout.
    pub fn to_vlr(&self) -> Vlr {
        let mut data = vec![0u8; self.dims.len() * DESCRIPTOR_SIZE];
        for (i, dim) in self.dims.iter().enumerate() {
            let descriptor = &mut data[i * DESCRIPTOR_SIZE..(i + 1) * DESCRIPTOR_SIZE];
            descriptor[2] = data_type_of(dim.ty);
            let name_bytes = dim.name.as_bytes();
            let n = name_bytes.len().min(NAME_SIZE);
            descriptor[NAME_OFFSET..NAME_OFFSET + n].copy_from_slice(&name_bytes[..n]);
        }
        Vlr {
            user_id: EXTRA_BYTES_USER_ID.to_string(),
            record_id: EXTRA_BYTES_RECORD_ID,
            description: "Extra dimensions".to_string(),
            data,
        }
    }

    /// Decode one point's payload into the store columns prepared by
    /// [`prepare_columns`].
    pub fn decode_into(
        &self,
        store: &mut PointStore,
        idx: usize,
        payload: &[u8],
    ) -> Result<(), TileIoError> {
        for dim in &self.dims {
            let at = dim.offset;
            match dim.ty {
                DimType::U8 => store.u8s_mut(&dim.name)?[idx] = payload[at],
                DimType::U16 => {
                    store.u16s_mut(&dim.name)?[idx] = LittleEndian::read_u16(&payload[at..])
                }
                DimType::U32 => {
                    store.u32s_mut(&dim.name)?[idx] = LittleEndian::read_u32(&payload[at..])
                }
                DimType::F32 => {
                    store.f32s_mut(&dim.name)?[idx] = LittleEndian::read_f32(&payload[at..])
                }
                DimType::F64 => {
                    store.f64s_mut(&dim.name)?[idx] = LittleEndian::read_f64(&payload[at..])
                }
            }
        }
        Ok(())
    }

    /// Encode one point's extra columns into a payload buffer.
    pub fn encode_from(
        &self,
        store: &PointStore,
        idx: usize,
        payload: &mut [u8],
    ) -> Result<(), TileIoError> {
        for dim in &self.dims {
            let at = dim.offset;
            match dim.ty {
                DimType::U8 => payload[at] = store.u8s(&dim.name)?[idx],
                DimType::U16 => {
                    LittleEndian::write_u16(&mut payload[at..], store.u16s(&dim.name)?[idx])
                }
                DimType::U32 => {
                    LittleEndian::write_u32(&mut payload[at..], store.u32s(&dim.name)?[idx])
                }
                DimType::F32 => {
                    LittleEndian::write_f32(&mut payload[at..], store.f32s(&dim.name)?[idx])
                }
                DimType::F64 => {
                    LittleEndian::write_f64(&mut payload[at..], store.f64s(&dim.name)?[idx])
                }
            }
        }
        Ok(())
    }

    /// Create the matching store columns, zero-filled.
    pub fn prepare_columns(&self, store: &mut PointStore) {
        for dim in &self.dims {
            store.add_dimension(&dim.name, dim.ty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlr_round_trip_preserves_layout() {
        let mut store = PointStore::with_len(1);
        store.add_dimension("x", DimType::F64);
        store.add_dimension("building_proba", DimType::F32);
        store.add_dimension("entropy", DimType::F32);
        store.add_dimension("candidate_cluster_id", DimType::U32);
        store.add_dimension("candidate_flag", DimType::U8);

        let layout = ExtraBytesLayout::from_store(&store);
        assert_eq!(layout.total_size(), 4 + 4 + 4 + 1);

        let vlr = layout.to_vlr();
        let parsed = ExtraBytesLayout::from_vlrs(std::slice::from_ref(&vlr)).unwrap();
        assert_eq!(parsed.total_size(), layout.total_size());
        let names: Vec<&str> = parsed.dims().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "building_proba",
                "entropy",
                "candidate_cluster_id",
                "candidate_flag"
            ]
        );
        assert_eq!(parsed.dims()[3].offset, 12);
    }

    #[test]
    fn per_point_payload_round_trip() {
        let mut store = PointStore::with_len(2);
        store.add_dimension("building_proba", DimType::F32);
        store.add_dimension("candidate_flag", DimType::U8);
        store.f32s_mut("building_proba").unwrap()[1] = 0.75;
        store.u8s_mut("candidate_flag").unwrap()[1] = 1;

        let layout = ExtraBytesLayout::from_store(&store);
        let mut payload = vec![0u8; layout.total_size()];
        layout.encode_from(&store, 1, &mut payload).unwrap();

        let mut decoded = PointStore::with_len(2);
        layout.prepare_columns(&mut decoded);
        layout.decode_into(&mut decoded, 1, &payload).unwrap();
        assert_eq!(decoded.f32s("building_proba").unwrap()[1], 0.75);
        assert_eq!(decoded.u8s("candidate_flag").unwrap()[1], 1);
    }

    #[test]
    fn missing_vlr_means_empty_layout() {
        let layout = ExtraBytesLayout::from_vlrs(&[]).unwrap();
        assert!(layout.is_empty());
        assert_eq!(layout.total_size(), 0);
    }
}

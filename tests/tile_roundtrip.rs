//! LAS round-trip properties: key dimensions preserved to 1e-4 relative,
//! extra dimensions forwarded exactly.

use lidar_forge::store::{Column, PointStore};
use lidar_forge::tile::{read_tile, write_tile, TileMeta};

fn meta_1_4() -> TileMeta {
    let mut builder = las::Builder::from((1, 4));
    builder.point_format = las::point::Format::new(8).unwrap();
    // Offsets keep the scaled integer coordinates in range for a tile in a
    // projected CRS
    builder.transforms = las::Vector {
        x: las::Transform {
            scale: 0.001,
            offset: 870_000.0,
        },
        y: las::Transform {
            scale: 0.001,
            offset: 6_618_000.0,
        },
        z: las::Transform {
            scale: 0.001,
            offset: 0.0,
        },
    };
    TileMeta::new(builder.into_header().unwrap())
}

fn sample_store() -> PointStore {
    let n = 100;
    let mut store = PointStore::with_len(n);
    store
        .insert_column(
            "x",
            Column::F64((0..n).map(|i| 870_000.0 + i as f64 * 0.5).collect()),
        )
        .unwrap();
    store
        .insert_column(
            "y",
            Column::F64((0..n).map(|i| 6_618_000.0 + (i % 10) as f64 * 0.5).collect()),
        )
        .unwrap();
    store
        .insert_column("z", Column::F64((0..n).map(|i| 100.0 + i as f64 * 0.01).collect()))
        .unwrap();
    store
        .insert_column("intensity", Column::U16((0..n).map(|i| (i * 37 % 4096) as u16).collect()))
        .unwrap();
    store
        .insert_column("return_number", Column::U8((0..n).map(|i| (i % 3 + 1) as u8).collect()))
        .unwrap();
    store
        .insert_column("number_of_returns", Column::U8(vec![3; n]))
        .unwrap();
    store
        .insert_column("classification", Column::U8((0..n).map(|i| if i % 2 == 0 { 202 } else { 2 }).collect()))
        .unwrap();
    store
        .insert_column("gps_time", Column::F64((0..n).map(|i| 300_000.0 + i as f64).collect()))
        .unwrap();
    store
        .insert_column("red", Column::U16((0..n).map(|i| (i * 11 % 65536) as u16).collect()))
        .unwrap();
    store
        .insert_column("green", Column::U16(vec![1000; n]))
        .unwrap();
    store
        .insert_column("blue", Column::U16(vec![2000; n]))
        .unwrap();
    store
        .insert_column("nir", Column::U16((0..n).map(|i| (i * 13 % 65536) as u16).collect()))
        .unwrap();
    store
        .insert_column(
            "building_proba",
            Column::F32((0..n).map(|i| (i as f32) / (n as f32)).collect()),
        )
        .unwrap();
    store
        .insert_column("entropy", Column::F32(vec![0.25; n]))
        .unwrap();
    store
        .insert_column(
            "candidate_cluster_id",
            Column::U32((0..n).map(|i| (i / 10) as u32).collect()),
        )
        .unwrap();
    store
}

fn stats(store: &PointStore, name: &str) -> (f64, f64, f64, f64) {
    let column = store.column(name).unwrap();
    let values: Vec<f64> = (0..store.len()).map(|i| column.get_f64(i)).collect();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = values.iter().sum();
    (min, max, sum / values.len() as f64, sum)
}

fn assert_rel_close(a: f64, b: f64, what: &str) {
    let scale = a.abs().max(b.abs()).max(1e-12);
    assert!(
        (a - b).abs() / scale <= 1e-4,
        "{what}: {a} vs {b} differs by more than 1e-4 relative"
    );
}

#[test]
fn las_round_trip_preserves_key_dimension_statistics() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tile.las");
    let store = sample_store();
    write_tile(&store, &meta_1_4(), &path).unwrap();

    let (back, _meta) = read_tile(&path).unwrap();
    assert_eq!(back.len(), store.len());

    for dim in [
        "x",
        "y",
        "z",
        "intensity",
        "return_number",
        "number_of_returns",
        "classification",
        "gps_time",
        "red",
        "green",
        "blue",
        "nir",
    ] {
        let (min_a, max_a, mean_a, sum_a) = stats(&store, dim);
        let (min_b, max_b, mean_b, sum_b) = stats(&back, dim);
        assert_rel_close(min_a, min_b, dim);
        assert_rel_close(max_a, max_b, dim);
        assert_rel_close(mean_a, mean_b, dim);
        assert_rel_close(sum_a, sum_b, dim);
    }
}

#[test]
fn extra_dimensions_survive_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tile.las");
    let store = sample_store();
    write_tile(&store, &meta_1_4(), &path).unwrap();

    let (back, _meta) = read_tile(&path).unwrap();
    assert_eq!(
        back.f32s("building_proba").unwrap(),
        store.f32s("building_proba").unwrap()
    );
    assert_eq!(back.f32s("entropy").unwrap(), store.f32s("entropy").unwrap());
    assert_eq!(
        back.u32s("candidate_cluster_id").unwrap(),
        store.u32s("candidate_cluster_id").unwrap()
    );
}

#[test]
fn integer_dimensions_are_bit_exact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tile.las");
    let store = sample_store();
    write_tile(&store, &meta_1_4(), &path).unwrap();

    let (back, _meta) = read_tile(&path).unwrap();
    assert_eq!(
        back.u8s("classification").unwrap(),
        store.u8s("classification").unwrap()
    );
    assert_eq!(back.u16s("intensity").unwrap(), store.u16s("intensity").unwrap());
    assert_eq!(back.u16s("nir").unwrap(), store.u16s("nir").unwrap());
}

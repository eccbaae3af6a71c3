//! Full optimizer study on a small synthetic corpus: prepare caches tiles and
//! cluster information, optimize finds thresholds that separate the corpus
//! perfectly, evaluate reports the metrics, update rewrites the tiles.

use std::path::Path;

use lidar_forge::config::defaults::{
    GROUP_INFO_FILE, PREPARED_SUBDIR, THRESHOLDS_FILE, UPDATED_SUBDIR,
};
use lidar_forge::config::AppConfig;
use lidar_forge::optimization::BuildingThresholdOptimizer;
use lidar_forge::store::{Column, PointStore};
use lidar_forge::tile::{read_tile, write_tile, TileMeta};
use lidar_forge::validation::DecisionThresholds;

const TP_CODE: u8 = 19;
const FP_CODE: u8 = 20;

/// 15 well-separated clusters of 10 points: 9 true buildings (code 19,
/// probability 0.95) and 6 false positives (code 20, probability 0.05).
fn corpus_store() -> PointStore {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut classification = Vec::new();
    let mut probabilities = Vec::new();
    for cluster in 0..15u32 {
        let is_building = cluster < 9;
        for i in 0..10u32 {
            xs.push(f64::from(cluster) * 10.0 + f64::from(i) * 0.4);
            ys.push(0.0);
            classification.push(if is_building { TP_CODE } else { FP_CODE });
            probabilities.push(if is_building { 0.95f32 } else { 0.05f32 });
        }
    }
    let n = xs.len();
    let mut store = PointStore::with_len(n);
    store.insert_column("x", Column::F64(xs)).unwrap();
    store.insert_column("y", Column::F64(ys)).unwrap();
    store.insert_column("z", Column::F64(vec![12.0; n])).unwrap();
    store
        .insert_column("classification", Column::U8(classification))
        .unwrap();
    store
        .insert_column("building_proba", Column::F32(probabilities))
        .unwrap();
    store
        .insert_column("entropy", Column::F32(vec![0.05; n]))
        .unwrap();
    store
}

fn write_corpus_tile(dir: &Path) {
    let mut builder = las::Builder::from((1, 4));
    builder.point_format = las::point::Format::new(8).unwrap();
    let meta = TileMeta::new(builder.into_header().unwrap());
    write_tile(&corpus_store(), &meta, &dir.join("corpus_tile.las")).unwrap();
}

/// A footprint shapefile whose only polygon sits far outside the corpus bbox.
fn write_remote_footprints(path: &Path) {
    let table = shapefile::dbase::TableWriterBuilder::new();
    let mut writer = shapefile::Writer::from_path(path, table).unwrap();
    let ring = shapefile::PolygonRing::Outer(vec![
        shapefile::Point::new(1000.0, 1000.0),
        shapefile::Point::new(1000.0, 1010.0),
        shapefile::Point::new(1010.0, 1010.0),
        shapefile::Point::new(1010.0, 1000.0),
    ]);
    let polygon = shapefile::Polygon::new(ring);
    writer
        .write_shape_and_record(&polygon, &shapefile::dbase::Record::default())
        .unwrap();
}

fn study_config(shp_path: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.building_validation.footprints.shp_path = Some(shp_path.to_path_buf());
    config.optimization.design.n_trials = 200;
    config.optimization.design.seed = Some(42);
    config.optimization.use_final_classification_codes = true;
    config.validate().unwrap();
    config
}

#[test]
fn full_study_reaches_perfect_metrics_on_separable_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let corpus_dir = dir.path().join("corpus");
    let out_dir = dir.path().join("study");
    std::fs::create_dir_all(&corpus_dir).unwrap();
    write_corpus_tile(&corpus_dir);
    let shp = dir.path().join("buildings.shp");
    write_remote_footprints(&shp);

    let config = study_config(&shp);
    let mut optimizer = BuildingThresholdOptimizer::new(&config, &corpus_dir, &out_dir);

    // prepare: cached tile + serialized cluster list
    optimizer.prepare().unwrap();
    assert!(out_dir.join(PREPARED_SUBDIR).join("corpus_tile.las").is_file());
    assert!(out_dir.join(GROUP_INFO_FILE).is_file());

    // optimize: feasible thresholds exist and round-trip through YAML
    let selected = optimizer.optimize().unwrap();
    let thresholds_file = out_dir.join(THRESHOLDS_FILE);
    assert!(thresholds_file.is_file());
    assert_eq!(DecisionThresholds::load(&thresholds_file).unwrap(), selected);

    // evaluate: the corpus is perfectly separable
    let metrics = optimizer.evaluate().unwrap();
    assert_eq!(metrics.groups_count, 15);
    assert_eq!(metrics.automation, 1.0);
    assert_eq!(metrics.precision, 1.0);
    assert_eq!(metrics.recall, 1.0);

    // update: decisions written back onto the cached tiles
    optimizer.update().unwrap();
    let updated = out_dir.join(UPDATED_SUBDIR).join("corpus_tile.las");
    assert!(updated.is_file());
    let (store, _meta) = read_tile(&updated).unwrap();
    let finals = config.data_format.codes.final_codes;
    let classification = store.u8s("classification").unwrap();
    assert!(classification
        .iter()
        .all(|&c| c == finals.building || c == finals.not_building));
    let buildings = classification
        .iter()
        .filter(|&&c| c == finals.building)
        .count();
    assert_eq!(buildings, 90);
}

#[test]
fn empty_corpus_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let corpus_dir = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus_dir).unwrap();
    let shp = dir.path().join("buildings.shp");
    write_remote_footprints(&shp);

    let config = study_config(&shp);
    let mut optimizer =
        BuildingThresholdOptimizer::new(&config, &corpus_dir, &dir.path().join("study"));
    let err = optimizer.run().unwrap_err();
    assert!(matches!(
        err,
        lidar_forge::optimization::OptimizeError::EmptyCorpus(_)
    ));
}

#[test]
fn missing_footprint_source_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let corpus_dir = dir.path().join("corpus");
    std::fs::create_dir_all(&corpus_dir).unwrap();
    write_corpus_tile(&corpus_dir);

    let mut config = AppConfig::default();
    config.building_validation.footprints.shp_path = None;
    let optimizer =
        BuildingThresholdOptimizer::new(&config, &corpus_dir, &dir.path().join("study"));
    let err = optimizer.prepare().unwrap_err();
    assert!(matches!(
        err,
        lidar_forge::optimization::OptimizeError::MissingFootprints
    ));
}

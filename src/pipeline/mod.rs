//! Pipeline driver: sequence the stages over one tile, or over every tile of
//! a directory.
//!
//! Per tile: read → validate (prepare + decide) → complete → identify →
//! write. The driver owns the point store and the footprint polygon set for
//! the duration of one tile; every stage can be disabled independently
//! through `pipeline` config toggles. In directory mode a failing tile is
//! logged with its path and the run continues with the next tile.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::cleaning::Cleaner;
use crate::completion::BuildingCompletor;
use crate::config::AppConfig;
use crate::footprint::{FootprintError, FootprintSource, ShapefileFootprints};
use crate::identification::BuildingIdentifier;
use crate::store::{PointStore, StoreError};
use crate::tile::{self, TileIoError};
use crate::validation::{BuildingValidator, ValidationError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(
        "validation is enabled but no footprint source is configured \
         (building_validation.footprints.shp_path)"
    )]
    MissingFootprints,

    #[error(transparent)]
    Tile(#[from] TileIoError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Footprint(#[from] FootprintError),
}

/// The four-stage building pipeline over single tiles.
pub struct Pipeline {
    config: AppConfig,
    validator: BuildingValidator,
    completor: BuildingCompletor,
    identifier: BuildingIdentifier,
}

impl Pipeline {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            config: config.clone(),
            validator: BuildingValidator::new(&config.data_format, &config.building_validation),
            completor: BuildingCompletor::new(&config.data_format, &config.building_completion),
            identifier: BuildingIdentifier::new(
                &config.data_format,
                &config.building_identification,
            ),
        }
    }

    /// Run the enabled stages over an in-memory store.
    pub fn run_store(
        &self,
        store: &mut PointStore,
        source: &dyn FootprintSource,
    ) -> Result<(), PipelineError> {
        let toggles = &self.config.pipeline;
        let cleaning = &self.config.data_format.cleaning;

        if toggles.clean_input {
            Cleaner::new(&cleaning.input_extra_dims).run(store);
        }
        if toggles.validate {
            self.validator.run(store, source)?;
        }
        if toggles.complete {
            self.completor.run(store)?;
        }
        if toggles.identify {
            self.identifier.run(store)?;
        }
        if toggles.clean_output {
            Cleaner::new(&cleaning.output_extra_dims).run(store);
        }
        Ok(())
    }

    /// Process one tile file into `output_dir`, keeping the file name.
    pub fn run_tile(
        &self,
        src: &Path,
        output_dir: &Path,
        source: &dyn FootprintSource,
    ) -> Result<PathBuf, PipelineError> {
        info!(tile = %src.display(), "applying building pipeline");
        let (mut store, meta) = tile::read_tile(src)?;
        self.run_store(&mut store, source)?;
        let target = output_dir.join(src.file_name().unwrap_or_default());
        tile::write_tile(&store, &meta, &target)?;
        info!(tile = %target.display(), "tile written");
        Ok(target)
    }

    /// Process a file or a whole directory of tiles. Per-tile errors are
    /// logged and counted; the run continues. Returns the failure count so
    /// the caller can decide the exit code.
    pub fn run_path(&self, input: &Path, output_dir: &Path) -> Result<usize, PipelineError> {
        let source = self.configured_source()?;
        let tiles = tile::discover_tiles(input)?;
        if tiles.is_empty() {
            warn!(input = %input.display(), "no LAS/LAZ tiles found");
            return Ok(0);
        }
        let mut failures = 0;
        for src in &tiles {
            if let Err(e) = self.run_tile(src, output_dir, source.as_ref()) {
                error!(tile = %src.display(), error = %e, "tile failed");
                failures += 1;
            }
        }
        Ok(failures)
    }

    /// The footprint source selected by configuration. Only required when
    /// validation is enabled; other stage combinations run without one.
    fn configured_source(&self) -> Result<Box<dyn FootprintSource>, PipelineError> {
        match &self.config.building_validation.footprints.shp_path {
            Some(path) => Ok(Box::new(ShapefileFootprints::new(
                path,
                self.config.data_format.epsg,
            ))),
            None if self.config.pipeline.validate => Err(PipelineError::MissingFootprints),
            None => Ok(Box::new(NoFootprints)),
        }
    }
}

/// Placeholder source for runs with validation disabled.
struct NoFootprints;

impl FootprintSource for NoFootprints {
    fn fetch(
        &self,
        _bbox: &crate::footprint::Bbox,
        _epsg: u32,
    ) -> Result<crate::footprint::PolygonSet, FootprintError> {
        Ok(crate::footprint::PolygonSet::empty())
    }
}

/// The standalone `cleaning` task: strip extra dimensions of every input
/// tile down to the configured output keep-list.
pub fn run_cleaning(config: &AppConfig, input: &Path, output_dir: &Path) -> Result<usize, PipelineError> {
    let cleaner = Cleaner::new(&config.data_format.cleaning.output_extra_dims);
    let tiles = tile::discover_tiles(input)?;
    if tiles.is_empty() {
        warn!(input = %input.display(), "no LAS/LAZ tiles found");
        return Ok(0);
    }
    let mut failures = 0;
    for src in &tiles {
        let outcome = (|| -> Result<(), PipelineError> {
            let (mut store, meta) = tile::read_tile(src)?;
            cleaner.run(&mut store);
            let target = output_dir.join(src.file_name().unwrap_or_default());
            tile::write_tile(&store, &meta, &target)?;
            info!(tile = %target.display(), "cleaned tile written");
            Ok(())
        })();
        if let Err(e) = outcome {
            error!(tile = %src.display(), error = %e, "cleaning failed");
            failures += 1;
        }
    }
    Ok(failures)
}

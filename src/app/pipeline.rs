//! Shared run pipeline used by the CLI and the integration tests.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! ingest -> transect grid -> inversion -> sensitivity -> derived outputs
//!
//! The CLI can then focus on presentation (printing vs writing tables).

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::agescale::ReferenceAgeScale;
use crate::data::SyntheticTransect;
use crate::domain::IsochroneAges;
use crate::error::AppError;
use crate::fit::{InversionInput, LocationFit, invert_transect};
use crate::grid::{DepthGrid, RawRadar, Transect};
use crate::io::{
    AGES_FILE, RADAR_FILE, RadarLayout, RunConfig, TRANSECT_CONFIG_FILE, find_reference,
    read_isochrone_ages, read_radar, read_reference, write_isochrone_ages, write_radar,
    write_reference,
};
use crate::report::{DerivedOutputs, derive_outputs};

/// Inputs of one transect after ingest.
#[derive(Debug, Clone)]
pub struct TransectInputs {
    pub raw: RawRadar,
    pub scale: ReferenceAgeScale,
    pub ages: IsochroneAges,
}

/// All computed outputs of a single run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub label: String,
    pub generated: DateTime<Utc>,
    pub config: RunConfig,
    pub transect: Transect,
    pub ages: IsochroneAges,
    pub fits: Vec<LocationFit>,
    pub derived: DerivedOutputs,
}

impl RunOutput {
    pub fn locations_ok(&self) -> usize {
        self.fits.iter().filter(|f| f.status.is_ok()).count()
    }
}

/// Read the radar, reference and ages tables of a transect directory.
///
/// With `derive_isochrone_ages`, the ages are recomputed at the reference
/// core and `ages.txt` is rewritten before use.
pub fn load_inputs(dir: &Path, config: &RunConfig) -> Result<TransectInputs, AppError> {
    let layout = RadarLayout {
        has_bed_elevation: config.has_bed_elevation,
        nbiso: config.nbiso,
        firn_correction: config.firn_correction,
    };
    let raw = read_radar(&dir.join(RADAR_FILE), layout, config.delimiter)?;
    let scale = read_reference(&find_reference(dir)?, config.delimiter)?;

    let ages = match (config.derive_isochrone_ages, config.reference_distance) {
        (true, Some(distance)) => {
            let ages = ages_at_reference(&raw, &scale, distance)?;
            write_isochrone_ages(dir, &ages)?;
            ages
        }
        _ => read_isochrone_ages(&dir.join(AGES_FILE), config.delimiter, raw.nbiso())?,
    };

    Ok(TransectInputs { raw, scale, ages })
}

/// Date every isochrone with the reference core at `distance` along the line.
pub fn ages_at_reference(
    raw: &RawRadar,
    scale: &ReferenceAgeScale,
    distance: f64,
) -> Result<IsochroneAges, AppError> {
    let depths: Vec<f64> = (0..raw.nbiso())
        .map(|k| raw.isochrone_depth_at(k, distance))
        .collect();
    log::info!("Isochrone depths at the reference core ({distance} km): {depths:.1?}");
    IsochroneAges::new(
        depths.iter().map(|&d| scale.depth_to_age(d)).collect(),
        depths.iter().map(|&d| scale.depth_to_sigma(d)).collect(),
    )
    .map_err(|e| {
        AppError::input(format!(
            "Cannot date the isochrones at {distance} km: {}",
            e.message()
        ))
    })
}

/// Resample, invert and summarise one transect.
pub fn run_model(label: &str, inputs: &TransectInputs, config: &RunConfig) -> Result<RunOutput, AppError> {
    let transect = Transect::build(&inputs.raw, config.extent())?;
    let grid = DepthGrid::new(config.dzeta)?;
    let initial = config.initial_params(transect.len())?;

    let input = InversionInput {
        scale: &inputs.scale,
        ages: &inputs.ages,
        priors: config.priors(),
        invert_g0: config.invert_g0,
        calc_sigma: config.calc_sigma,
        settings: config.forward_settings(),
        optimizer: config.optimizer,
    };
    let fits = invert_transect(&transect, &grid, &initial, &input, config.mode)?;
    let derived = derive_outputs(
        &transect,
        &fits,
        &inputs.ages,
        config.age_surf,
        config.bottom_offset,
        config.reference_distance,
    );

    Ok(RunOutput {
        label: label.to_string(),
        generated: Utc::now(),
        config: config.clone(),
        transect,
        ages: inputs.ages.clone(),
        fits,
        derived,
    })
}

/// Execute the full pipeline on a transect directory.
pub fn run_transect(dir: &Path, config: &RunConfig) -> Result<RunOutput, AppError> {
    let label = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string());
    log::info!("Transect: {label}");
    let inputs = load_inputs(dir, config)?;
    run_model(&label, &inputs, config)
}

/// Write a synthetic line as a transect directory `run_transect` can read.
pub fn write_synthetic(dir: &Path, line: &SyntheticTransect, config: &RunConfig) -> Result<(), AppError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", dir.display())))?;
    write_radar(dir, &line.raw)?;
    write_reference(dir, &line.reference)?;
    write_isochrone_ages(dir, &line.ages)?;

    let path = dir.join(TRANSECT_CONFIG_FILE);
    let file = std::fs::File::create(&path)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, config)
        .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", path.display())))?;
    Ok(())
}

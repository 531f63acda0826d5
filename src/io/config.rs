//! Run configuration.
//!
//! A transect directory is configured by JSON files merged key by key:
//!
//! 1. an optional shared file (same settings for every transect)
//! 2. the transect's own `parameters.json`
//!
//! The transect file wins. Command-line flags are applied last by the caller.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{InversionMode, Priors};
use crate::error::AppError;
use crate::fit::LmConfig;
use crate::grid::GridExtent;
use crate::model::{ColumnParams, ForwardSettings};

/// File name of the per-transect configuration inside a transect directory.
pub const TRANSECT_CONFIG_FILE: &str = "parameters.json";

/// A parameter given once for the whole transect or once per location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerLocation {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl PerLocation {
    /// Expand to one value per location.
    pub fn resolve(&self, n: usize, name: &str) -> Result<Vec<f64>, AppError> {
        match self {
            PerLocation::Scalar(v) => Ok(vec![*v; n]),
            PerLocation::Vector(values) if values.len() == n => Ok(values.clone()),
            PerLocation::Vector(values) => Err(AppError::input(format!(
                "'{name}' has {} values but the transect has {n} locations.",
                values.len()
            ))),
        }
    }

    fn all(&self, predicate: impl Fn(f64) -> bool) -> bool {
        match self {
            PerLocation::Scalar(v) => predicate(*v),
            PerLocation::Vector(values) => values.iter().all(|v| predicate(*v)),
        }
    }
}

impl From<f64> for PerLocation {
    fn from(value: f64) -> Self {
        PerLocation::Scalar(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Spacing of the distance grid (km).
    pub resolution: f64,
    /// `None` derives the extent from the radar data.
    pub distance_start: Option<f64>,
    pub distance_end: Option<f64>,
    pub dzeta: f64,
    /// Added to thickness and isochrone depths at read time (m).
    pub firn_correction: f64,
    /// Number of isochrone columns to use; `None` uses every column present.
    pub nbiso: Option<usize>,
    pub has_bed_elevation: bool,
    /// Field separator of the flat tables. Runs of a whitespace separator count as one.
    pub delimiter: char,

    pub surface_temperature: PerLocation,
    pub age_surf: f64,
    pub accumulation: PerLocation,
    pub pprime: PerLocation,
    pub sliding: PerLocation,
    pub g0: PerLocation,

    pub pprime_prior: f64,
    pub pprime_sigma: f64,
    pub g0_prior: f64,
    pub g0_sigma: f64,

    pub thermal_iterations: usize,
    pub invert_g0: bool,
    pub calc_sigma: bool,
    pub mode: InversionMode,

    /// Distance of the reference core along the transect (km).
    pub reference_distance: Option<f64>,
    /// Recompute the isochrone ages at the reference core and rewrite `ages.txt`.
    pub derive_isochrone_ages: bool,
    /// Height above the bed at which the basal age is read (m).
    pub bottom_offset: f64,

    pub optimizer: LmConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            distance_start: None,
            distance_end: None,
            dzeta: 0.01,
            firn_correction: 0.0,
            nbiso: None,
            has_bed_elevation: false,
            delimiter: '\t',
            surface_temperature: PerLocation::Scalar(218.0),
            age_surf: 0.0,
            accumulation: PerLocation::Scalar(0.025),
            pprime: PerLocation::Scalar(0.7),
            sliding: PerLocation::Scalar(0.0),
            g0: PerLocation::Scalar(0.05),
            pprime_prior: 0.7,
            pprime_sigma: 1.0,
            g0_prior: 0.05,
            g0_sigma: 0.025,
            thermal_iterations: 5,
            invert_g0: false,
            calc_sigma: true,
            mode: InversionMode::PerLocation,
            reference_distance: None,
            derive_isochrone_ages: false,
            bottom_offset: 60.0,
            optimizer: LmConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load the shared file (if any) and the transect's own file (if present), merged.
    pub fn load(transect_dir: &Path, shared: Option<&Path>) -> Result<Self, AppError> {
        let mut merged = Value::Object(Default::default());
        if let Some(path) = shared {
            merge_values(&mut merged, read_json(path)?);
        }
        let own = transect_dir.join(TRANSECT_CONFIG_FILE);
        if own.is_file() {
            merge_values(&mut merged, read_json(&own)?);
        }
        let config: RunConfig = serde_json::from_value(merged)
            .map_err(|e| AppError::input(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(AppError::input("resolution must be positive."));
        }
        if !(self.dzeta > 0.0 && self.dzeta < 1.0) {
            return Err(AppError::input("dzeta must lie in (0, 1)."));
        }
        if let (Some(start), Some(end)) = (self.distance_start, self.distance_end) {
            if end < start {
                return Err(AppError::input(format!(
                    "distance_end ({end}) is before distance_start ({start})."
                )));
            }
        }
        for (name, sigma) in [("pprime_sigma", self.pprime_sigma), ("g0_sigma", self.g0_sigma)] {
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(AppError::input(format!("{name} must be positive.")));
            }
        }
        if self.thermal_iterations == 0 {
            return Err(AppError::input("thermal_iterations must be at least 1."));
        }
        if !self.accumulation.all(|a| a > 0.0) {
            return Err(AppError::input("accumulation must be positive."));
        }
        if !self.sliding.all(|s| (0.0..=1.0).contains(&s)) {
            return Err(AppError::input("sliding must lie in [0, 1]."));
        }
        if !self.surface_temperature.all(|t| t > 0.0) {
            return Err(AppError::input("surface_temperature must be in kelvin."));
        }
        if self.derive_isochrone_ages && self.reference_distance.is_none() {
            return Err(AppError::input(
                "derive_isochrone_ages requires reference_distance.",
            ));
        }
        if !self.delimiter.is_ascii() {
            return Err(AppError::input("delimiter must be an ASCII character."));
        }
        if self.optimizer.max_iterations == 0 {
            return Err(AppError::input("optimizer.max_iterations must be at least 1."));
        }
        Ok(())
    }

    pub fn extent(&self) -> GridExtent {
        GridExtent {
            resolution: self.resolution,
            start: self.distance_start,
            end: self.distance_end,
        }
    }

    pub fn priors(&self) -> Priors {
        Priors {
            pprime: self.pprime_prior,
            pprime_sigma: self.pprime_sigma,
            g0: self.g0_prior,
            g0_sigma: self.g0_sigma,
        }
    }

    pub fn forward_settings(&self) -> ForwardSettings {
        ForwardSettings {
            thermal_iterations: self.thermal_iterations,
            age_surf: self.age_surf,
        }
    }

    /// Initial (and fixed) parameters for `n` locations.
    pub fn initial_params(&self, n: usize) -> Result<Vec<ColumnParams>, AppError> {
        let a = self.accumulation.resolve(n, "accumulation")?;
        let pprime = self.pprime.resolve(n, "pprime")?;
        let s = self.sliding.resolve(n, "sliding")?;
        let g0 = self.g0.resolve(n, "g0")?;
        let ts = self.surface_temperature.resolve(n, "surface_temperature")?;
        Ok((0..n)
            .map(|j| ColumnParams {
                accumulation: a[j],
                pprime: pprime[j],
                sliding: s[j],
                g0: g0[j],
                surface_temperature: ts[j],
            })
            .collect())
    }
}

fn read_json(path: &Path) -> Result<Value, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open config '{}': {e}", path.display())))?;
    serde_json::from_reader(file)
        .map_err(|e| AppError::input(format!("Invalid JSON in '{}': {e}", path.display())))
}

/// Overlay `top` onto `base`; nested objects are merged, everything else replaced.
pub fn merge_values(base: &mut Value, top: Value) {
    match (base, top) {
        (Value::Object(base), Value::Object(top)) => {
            for (key, value) in top {
                match base.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

//! Reference core dating and the steady age clock derived from it.
//!
//! The reference core records a non-steady accumulation history. Rescaling each
//! age increment by `accu_i / mean_accu` removes that history and yields a
//! "steady age" scale, the native clock of the steady-state column model.
//! Model ages are computed in steady age and mapped back to calendar age here.

use crate::error::AppError;
use crate::math::{Interp1d, first_non_increasing};

/// Extra depth appended past the bottom of the core so that transect columns
/// deeper than the core still map to an ice-equivalent depth.
const DEPTH_SENTINEL_EXTENSION: f64 = 3000.0;
/// Far-past abscissa of the lower steady/calendar sentinel.
const LOWER_SENTINEL: f64 = -1e9;
/// Upper sentinels sit at this multiple of the last sample.
const UPPER_SENTINEL_FACTOR: f64 = 1e6;

/// One row of the reference table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceSample {
    pub depth: f64,
    pub iedepth: f64,
    pub accumulation: f64,
    pub age: f64,
    pub sigma_age: f64,
}

/// Immutable reference age scale with its derived lookups.
#[derive(Debug, Clone)]
pub struct ReferenceAgeScale {
    depth: Vec<f64>,
    iedepth: Vec<f64>,
    accumulation: Vec<f64>,
    age: Vec<f64>,
    sigma_age: Vec<f64>,
    steady_age: Vec<f64>,
    average_accumulation: f64,

    depth_to_ie: Interp1d,
    ie_to_depth: Interp1d,
    depth_to_age: Interp1d,
    depth_to_sigma: Interp1d,
    steady_to_calendar: Interp1d,
    calendar_to_steady: Interp1d,
}

impl ReferenceAgeScale {
    /// Build the scale from rows sorted by increasing depth.
    ///
    /// Depth, ice-equivalent depth and age must all be strictly increasing.
    pub fn new(samples: &[ReferenceSample]) -> Result<Self, AppError> {
        if samples.len() < 2 {
            return Err(AppError::input(
                "Reference age scale needs at least two rows.",
            ));
        }
        let depth: Vec<f64> = samples.iter().map(|s| s.depth).collect();
        let iedepth: Vec<f64> = samples.iter().map(|s| s.iedepth).collect();
        let accumulation: Vec<f64> = samples.iter().map(|s| s.accumulation).collect();
        let age: Vec<f64> = samples.iter().map(|s| s.age).collect();
        let sigma_age: Vec<f64> = samples.iter().map(|s| s.sigma_age).collect();

        for (name, col) in [("depth", &depth), ("ice-equivalent depth", &iedepth), ("age", &age)] {
            if let Some(i) = first_non_increasing(col) {
                return Err(AppError::input(format!(
                    "Reference {name} is not strictly increasing at row {i}."
                )));
            }
        }
        if accumulation.iter().any(|a| !a.is_finite() || *a <= 0.0) {
            return Err(AppError::input(
                "Reference accumulation must be finite and positive.",
            ));
        }

        let average_accumulation = average_accumulation(&age, &accumulation);
        let steady_age = steady_age(&age, &accumulation, average_accumulation);

        let n = depth.len();
        let depth_ext = depth[n - 1] + DEPTH_SENTINEL_EXTENSION;
        let ie_ext = iedepth[n - 1] + DEPTH_SENTINEL_EXTENSION;
        let depth_to_ie =
            Interp1d::with_sentinels(&depth, &iedepth, None, Some((depth_ext, ie_ext)))?;
        let ie_to_depth =
            Interp1d::with_sentinels(&iedepth, &depth, None, Some((ie_ext, depth_ext)))?;
        let depth_to_age = Interp1d::new(depth.clone(), age.clone())?;
        let depth_to_sigma = Interp1d::new(depth.clone(), sigma_age.clone())?;

        let steady_last = steady_age[n - 1];
        let age_last = age[n - 1];
        let steady_to_calendar = Interp1d::with_sentinels(
            &steady_age,
            &age,
            Some((LOWER_SENTINEL, age[0])),
            Some((UPPER_SENTINEL_FACTOR * steady_last, UPPER_SENTINEL_FACTOR * age_last)),
        )?;
        let calendar_to_steady = Interp1d::with_sentinels(
            &age,
            &steady_age,
            Some((LOWER_SENTINEL, steady_age[0])),
            Some((UPPER_SENTINEL_FACTOR * age_last, UPPER_SENTINEL_FACTOR * steady_last)),
        )?;

        log::debug!(
            "Reference scale: {n} rows, average accumulation {average_accumulation:.5} m/yr, steady/calendar ratio at bottom {:.4}",
            steady_last / age_last
        );

        Ok(Self {
            depth,
            iedepth,
            accumulation,
            age,
            sigma_age,
            steady_age,
            average_accumulation,
            depth_to_ie,
            ie_to_depth,
            depth_to_age,
            depth_to_sigma,
            steady_to_calendar,
            calendar_to_steady,
        })
    }

    pub fn len(&self) -> usize {
        self.depth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth.is_empty()
    }

    pub fn depth(&self) -> &[f64] {
        &self.depth
    }

    pub fn iedepth(&self) -> &[f64] {
        &self.iedepth
    }

    pub fn accumulation(&self) -> &[f64] {
        &self.accumulation
    }

    pub fn age(&self) -> &[f64] {
        &self.age
    }

    pub fn sigma_age(&self) -> &[f64] {
        &self.sigma_age
    }

    pub fn steady_age(&self) -> &[f64] {
        &self.steady_age
    }

    /// Age-weighted mean accumulation over the whole core.
    pub fn average_accumulation(&self) -> f64 {
        self.average_accumulation
    }

    /// Real depth to ice-equivalent depth.
    pub fn depth_to_iedepth(&self, depth: f64) -> f64 {
        self.depth_to_ie.eval(depth)
    }

    /// Ice-equivalent depth back to real depth.
    pub fn iedepth_to_depth(&self, iedepth: f64) -> f64 {
        self.ie_to_depth.eval(iedepth)
    }

    /// Calendar age at a core depth (NaN outside the dated section).
    pub fn depth_to_age(&self, depth: f64) -> f64 {
        self.depth_to_age.eval(depth)
    }

    /// Dating uncertainty at a core depth (NaN outside the dated section).
    pub fn depth_to_sigma(&self, depth: f64) -> f64 {
        self.depth_to_sigma.eval(depth)
    }

    pub fn steady_to_calendar(&self, steady: f64) -> f64 {
        self.steady_to_calendar.eval(steady)
    }

    pub fn calendar_to_steady(&self, calendar: f64) -> f64 {
        self.calendar_to_steady.eval(calendar)
    }
}

/// `Σ (age_{i+1} - age_i) accu_i / (age_last - age_0)`.
fn average_accumulation(age: &[f64], accu: &[f64]) -> f64 {
    let n = age.len();
    let weighted: f64 = (0..n - 1).map(|i| (age[i + 1] - age[i]) * accu[i]).sum();
    weighted / (age[n - 1] - age[0])
}

fn steady_age(age: &[f64], accu: &[f64], average: f64) -> Vec<f64> {
    let mut steady = Vec::with_capacity(age.len());
    steady.push(age[0]);
    for i in 0..age.len() - 1 {
        let prev = steady[i];
        steady.push(prev + (age[i + 1] - age[i]) * accu[i] / average);
    }
    steady
}

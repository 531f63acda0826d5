//! Shared domain types.
//!
//! These types are intentionally kept lightweight so they can be:
//!
//! - used in-memory during inversion
//! - deserialized from the run configuration
//! - exported to the flat result tables

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// How the free parameters are estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InversionMode {
    /// One optimisation over every location's parameters at once.
    Joint,
    /// Independent optimisation per location (run in parallel).
    PerLocation,
    /// No optimisation: evaluate the forward model at the initial parameters.
    Evaluate,
}

impl InversionMode {
    pub fn label(self) -> &'static str {
        match self {
            InversionMode::Joint => "joint",
            InversionMode::PerLocation => "per-location",
            InversionMode::Evaluate => "evaluate",
        }
    }
}

/// Calendar ages of the dated isochrones, shared along the transect.
#[derive(Debug, Clone, PartialEq)]
pub struct IsochroneAges {
    pub age: Vec<f64>,
    pub sigma: Vec<f64>,
}

impl IsochroneAges {
    /// Ages must be finite and strictly increasing with index; sigmas positive.
    pub fn new(age: Vec<f64>, sigma: Vec<f64>) -> Result<Self, AppError> {
        if age.len() != sigma.len() {
            return Err(AppError::input(format!(
                "Isochrone ages table has {} ages but {} sigmas.",
                age.len(),
                sigma.len()
            )));
        }
        if age.iter().any(|a| !a.is_finite()) {
            return Err(AppError::input("Isochrone ages must be finite."));
        }
        if let Some(i) = (1..age.len()).find(|&i| age[i] <= age[i - 1]) {
            return Err(AppError::input(format!(
                "Isochrone ages must increase with index (isochrone {} is not older than {}).",
                i + 1,
                i
            )));
        }
        if sigma.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(AppError::input("Isochrone age sigmas must be positive."));
        }
        Ok(Self { age, sigma })
    }

    pub fn len(&self) -> usize {
        self.age.len()
    }

    pub fn is_empty(&self) -> bool {
        self.age.is_empty()
    }
}

/// Gaussian priors regularising the inversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Priors {
    pub pprime: f64,
    pub pprime_sigma: f64,
    pub g0: f64,
    pub g0_sigma: f64,
}

/// Outcome of the estimation at one location.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationStatus {
    Ok,
    /// Thickness missing after resampling; the column was not modelled.
    Skipped(String),
    /// Numerical failure in the forward model; outputs are NaN.
    Failed(String),
}

impl LocationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LocationStatus::Ok => "ok",
            LocationStatus::Skipped(_) => "skipped",
            LocationStatus::Failed(_) => "failed",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, LocationStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isochrone_ages_must_increase() {
        assert!(IsochroneAges::new(vec![1000.0, 5000.0], vec![50.0, 80.0]).is_ok());
        let err = IsochroneAges::new(vec![5000.0, 1000.0], vec![50.0, 80.0]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(IsochroneAges::new(vec![1000.0], vec![0.0]).is_err());
    }

    #[test]
    fn mode_names_are_kebab_case() {
        let mode: InversionMode = serde_json::from_str("\"per-location\"").unwrap();
        assert_eq!(mode, InversionMode::PerLocation);
        assert_eq!(InversionMode::Joint.label(), "joint");
    }
}

//! Coupled flow/thermal forward model for one column.
//!
//! Inputs are immutable (geometry, parameters, reference scale); the result is
//! an owned [`ColumnSolution`]. Nothing is cached between calls, so columns
//! can be evaluated concurrently.

use super::mechanics::{FlowState, flux_shape, shape_from_pprime};
use super::physics::basal_melting_point;
use super::thermal::{BasalRegime, ThermalBoundary, analytic_seed, next_regime, solve_temperature};
use crate::agescale::ReferenceAgeScale;
use crate::error::AppError;
use crate::grid::ColumnGeometry;
use crate::math::interp_sorted;

/// Free and fixed parameters of one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnParams {
    /// Surface accumulation (m ice/yr).
    pub accumulation: f64,
    /// `ln(1 + p)`.
    pub pprime: f64,
    /// Sliding fraction in `[0, 1]`.
    pub sliding: f64,
    /// Geothermal flux (W/m²).
    pub g0: f64,
    /// Surface temperature (K).
    pub surface_temperature: f64,
}

/// Settings shared by every column of a run.
#[derive(Debug, Clone, Copy)]
pub struct ForwardSettings {
    pub thermal_iterations: usize,
    /// Calendar age of the surface node.
    pub age_surf: f64,
}

/// Full forward solution of one column.
#[derive(Debug, Clone)]
pub struct ColumnSolution {
    pub params: ColumnParams,
    /// Shape parameter `p = exp(p') - 1`.
    pub p: f64,
    /// Basal melt rate (m ice/yr).
    pub melt: f64,
    /// Conducted basal flux (W/m²).
    pub basal_flux: f64,
    pub melting_point: f64,
    /// Regime used in the last thermal solve.
    pub regime: BasalRegime,
    /// Whether the state machine kept `regime` after the last solve.
    pub settled: bool,
    pub transitions: usize,
    pub temperature: Vec<f64>,
    pub tau: Vec<f64>,
    pub uz: Vec<f64>,
    pub steady_age: Vec<f64>,
    pub age: Vec<f64>,
}

impl ColumnSolution {
    /// Calendar age at an arbitrary depth; NaN outside the column.
    pub fn age_at_depth(&self, geom: &ColumnGeometry, depth: f64) -> f64 {
        interp_sorted(&geom.depth, &self.age, depth)
    }

    /// Model age at each observed isochrone depth.
    pub fn isochrone_ages(&self, geom: &ColumnGeometry, iso_depth: &[f64]) -> Vec<f64> {
        iso_depth
            .iter()
            .map(|&d| self.age_at_depth(geom, d))
            .collect()
    }

    /// Outputs propagated by the sensitivity engine, in this order:
    /// `a, m, p', age[0..n], ln(age[1..n]), G0`.
    pub fn output_vector(&self) -> Vec<f64> {
        let n = self.age.len();
        let mut out = Vec::with_capacity(2 * n + 3);
        out.push(self.params.accumulation);
        out.push(self.melt);
        out.push(self.params.pprime);
        out.extend_from_slice(&self.age);
        out.extend(self.age[1..].iter().map(|a| a.ln()));
        out.push(self.params.g0);
        out
    }
}

/// Run the coupled model for one column.
pub fn solve_column(
    geom: &ColumnGeometry,
    params: ColumnParams,
    settings: ForwardSettings,
    scale: &ReferenceAgeScale,
) -> Result<ColumnSolution, AppError> {
    if !(params.accumulation.is_finite() && params.accumulation > 0.0) {
        return Err(AppError::numeric(format!(
            "Accumulation must be positive, got {}.",
            params.accumulation
        )));
    }
    if !(params.pprime.is_finite() && params.g0.is_finite()) {
        return Err(AppError::numeric("Non-finite column parameters."));
    }

    let p = shape_from_pprime(params.pprime);
    let melting_point = basal_melting_point(geom.thkie);
    let boundary = ThermalBoundary {
        surface_temperature: params.surface_temperature,
        melting_point,
        g0: params.g0,
    };

    let seed = analytic_seed(
        geom,
        params.accumulation,
        params.surface_temperature,
        params.g0,
        melting_point,
    )?;
    let omega = flux_shape(&geom.zetaie, p, params.sliding);

    let mut regime = seed.regime;
    let mut used = seed.regime;
    let mut temperature = seed.temperature;
    let mut melt = seed.melt;
    let mut basal_flux = seed.flux;
    let mut flow = FlowState::new(&omega, params.accumulation, melt);
    let mut transitions = 0;
    let mut settled = true;

    for _ in 0..settings.thermal_iterations {
        let step = solve_temperature(regime, geom, &flow.uz, &temperature, boundary)?;
        temperature = step.temperature;
        basal_flux = step.flux;
        // A temperate bed that cannot sustain melting refreezes next step.
        melt = step.melt.max(0.0);
        used = regime;

        let base_temperature = temperature[temperature.len() - 1];
        let next = next_regime(regime, basal_flux, base_temperature, params.g0, melting_point);
        settled = next == regime;
        if !settled {
            transitions += 1;
            log::trace!(
                "Basal regime {} -> {} (flux {basal_flux:.5}, base {base_temperature:.3} K)",
                regime.label(),
                next.label()
            );
        }
        regime = next;
        flow = FlowState::new(&omega, params.accumulation, melt);
    }

    let steady_age = steady_age_profile(geom, &flow.tau, params.accumulation, settings.age_surf);
    let age = steady_age
        .iter()
        .map(|&s| scale.steady_to_calendar(s))
        .collect();

    Ok(ColumnSolution {
        params,
        p,
        melt,
        basal_flux,
        melting_point,
        regime: used,
        settled,
        transitions,
        temperature,
        tau: flow.tau,
        uz: flow.uz,
        steady_age,
        age,
    })
}

/// Integrate `1 / (a tau)` over ice-equivalent depth from the surface age.
///
/// Layers with non-positive mean thinning have undefined age density; every
/// node below such a layer is NaN.
pub fn steady_age_profile(geom: &ColumnGeometry, tau: &[f64], accumulation: f64, age_surf: f64) -> Vec<f64> {
    let n = tau.len();
    let mut steady = Vec::with_capacity(n);
    steady.push(age_surf);
    for i in 0..n - 1 {
        let mean_tau = (tau[i] + tau[i + 1]) / 2.0;
        let density = if mean_tau > 0.0 {
            1.0 / (accumulation * mean_tau)
        } else {
            f64::NAN
        };
        let prev = steady[i];
        steady.push(prev + (geom.depthie[i + 1] - geom.depthie[i]) * density);
    }
    steady
}

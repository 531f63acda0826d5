//! Steady heat conduction/advection in one ice column.
//!
//! The bed is either **temperate** (pinned at the pressure-melting point, excess
//! geothermal flux melts ice) or **frozen** (geothermal flux imposed as a
//! Neumann condition, no melt). Each thermal sub-step solves the linear system
//! for the current regime with conductivity and heat capacity lagged at the
//! previous temperature, then [`next_regime`] decides the regime of the next
//! sub-step.
//!
//! Discretisation on the real-depth grid (`h = dzeta * thk`), for interior node `g`:
//!
//! ```text
//! (k_{g-1}/h - ρ c_g / 2) T_{g-1} - (k_{g-1} + k_g)/h T_g + (k_g/h + ρ c_g / 2) T_{g+1} = 0
//! k_g = K((T_g + T_{g+1}) / 2, D_g)
//! c_g = (D_{g-1} + D_g) / 2 * uz_g * cp(T_g)
//! ```

use std::f64::consts::PI;

use statrs::function::erf::erf;

use super::physics::{RHO_ICE, conductivity, heat_capacity, melt_rate};
use crate::error::AppError;
use crate::grid::ColumnGeometry;
use crate::math::Tridiagonal;

/// Basal thermal boundary condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasalRegime {
    /// Base at the melting point; melt rate from the flux imbalance.
    Temperate,
    /// Base below the melting point; basal flux equals the geothermal flux.
    Frozen,
}

impl BasalRegime {
    pub fn label(self) -> &'static str {
        match self {
            BasalRegime::Temperate => "temperate",
            BasalRegime::Frozen => "frozen",
        }
    }
}

/// Regime transition after a thermal solve.
///
/// - temperate -> frozen when the geothermal flux no longer exceeds the flux
///   conducted away from the bed (`g0 <= solved_flux`)
/// - frozen -> temperate when the solved basal temperature exceeds the
///   melting point
///
/// There is no hysteresis.
pub fn next_regime(
    current: BasalRegime,
    solved_flux: f64,
    base_temperature: f64,
    g0: f64,
    melting_point: f64,
) -> BasalRegime {
    match current {
        BasalRegime::Temperate if g0 <= solved_flux => BasalRegime::Frozen,
        BasalRegime::Frozen if base_temperature > melting_point => BasalRegime::Temperate,
        other => other,
    }
}

/// Conduction-only plug-flow solution used to seed the iteration.
#[derive(Debug, Clone)]
pub struct AnalyticSeed {
    pub regime: BasalRegime,
    /// Basal conducted flux, capped at `g0`.
    pub flux: f64,
    pub melt: f64,
    pub temperature: Vec<f64>,
}

/// Error-function solution of the steady 1-D advection-diffusion equation
/// with uniform downward velocity `a` and properties at the mean temperature.
pub fn analytic_seed(
    geom: &ColumnGeometry,
    accumulation: f64,
    surface_temperature: f64,
    g0: f64,
    melting_point: f64,
) -> Result<AnalyticSeed, AppError> {
    let tm = (surface_temperature + melting_point) / 2.0;
    let k = conductivity(tm, 1.0);
    let alpha = (accumulation / super::physics::SECONDS_PER_YEAR / geom.thk / k * RHO_ICE
        * heat_capacity(tm)
        / 2.0)
        .sqrt();
    if !(alpha.is_finite() && alpha > 0.0) {
        return Err(AppError::numeric(format!(
            "Analytic temperature seed undefined for accumulation {accumulation}."
        )));
    }

    let delta_t = surface_temperature - melting_point;
    let critical = -delta_t * 2.0 * k * alpha / PI.sqrt() / erf(geom.thkie * alpha);
    let regime = if g0 > critical {
        BasalRegime::Temperate
    } else {
        BasalRegime::Frozen
    };
    let flux = critical.min(g0);
    let melt = melt_rate(g0, flux);

    let base = erf(alpha * geom.thkie);
    let temperature = geom
        .zeta
        .iter()
        .map(|z| {
            surface_temperature
                - flux * PI.sqrt() / 2.0 / k / alpha * (erf(alpha * z * geom.thkie) - base)
        })
        .collect();

    Ok(AnalyticSeed {
        regime,
        flux,
        melt,
        temperature,
    })
}

/// Boundary data shared by both regimes.
#[derive(Debug, Clone, Copy)]
pub struct ThermalBoundary {
    pub surface_temperature: f64,
    pub melting_point: f64,
    pub g0: f64,
}

/// Result of one thermal sub-step.
#[derive(Debug, Clone)]
pub struct ThermalStep {
    pub temperature: Vec<f64>,
    /// Conducted basal flux (equal to `g0` when frozen).
    pub flux: f64,
    /// Melt implied by the flux imbalance, before any clamping.
    pub melt: f64,
}

/// Solve the column temperature for `regime`, with properties lagged at `previous`.
pub fn solve_temperature(
    regime: BasalRegime,
    geom: &ColumnGeometry,
    uz: &[f64],
    previous: &[f64],
    boundary: ThermalBoundary,
) -> Result<ThermalStep, AppError> {
    let n = geom.len();
    let h = geom.step();
    let d = &geom.density;

    let k: Vec<f64> = (0..n - 1)
        .map(|g| conductivity((previous[g] + previous[g + 1]) / 2.0, d[g]))
        .collect();
    // Advection coefficient `ρ c_g / 2` for interior nodes (index 0 and n-1 unused).
    let adv: Vec<f64> = (0..n)
        .map(|g| {
            if g == 0 || g == n - 1 {
                0.0
            } else {
                0.5 * RHO_ICE * (d[g - 1] + d[g]) / 2.0 * uz[g] * heat_capacity(previous[g])
            }
        })
        .collect();

    let interior_lower = |g: usize| k[g - 1] / h - adv[g];
    let interior_upper = |g: usize| k[g] / h + adv[g];

    let unknowns = match regime {
        BasalRegime::Temperate => n - 2,
        BasalRegime::Frozen => n - 1,
    };
    let mut system = Tridiagonal::zeros(unknowns);
    let mut rhs = vec![0.0; unknowns];
    for g in 1..n - 1 {
        let row = g - 1;
        system.lower[row] = interior_lower(g);
        system.diag[row] = -(k[g - 1] + k[g]) / h;
        system.upper[row] = interior_upper(g);
    }
    rhs[0] -= interior_lower(1) * boundary.surface_temperature;

    let mut temperature = vec![0.0; n];
    temperature[0] = boundary.surface_temperature;

    match regime {
        BasalRegime::Temperate => {
            rhs[unknowns - 1] -= interior_upper(n - 2) * boundary.melting_point;
            let solved = system.solve(&rhs)?;
            temperature[1..n - 1].copy_from_slice(&solved);
            temperature[n - 1] = boundary.melting_point;

            // Conductivity at the solved basal temperatures, not the lagged ones.
            let k_base = conductivity((temperature[n - 2] + temperature[n - 1]) / 2.0, d[n - 2]);
            let flux = -k_base * (temperature[n - 2] - temperature[n - 1])
                / (geom.depthie[n - 1] - geom.depthie[n - 2]);
            Ok(ThermalStep {
                temperature,
                flux,
                melt: melt_rate(boundary.g0, flux),
            })
        }
        BasalRegime::Frozen => {
            let last = unknowns - 1;
            system.lower[last] = k[n - 2] / h;
            system.diag[last] = -k[n - 2] / h;
            rhs[last] = -boundary.g0;
            let solved = system.solve(&rhs)?;
            temperature[1..n].copy_from_slice(&solved);
            Ok(ThermalStep {
                temperature,
                flux: boundary.g0,
                melt: 0.0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agescale::{ReferenceAgeScale, ReferenceSample};
    use crate::grid::DepthGrid;
    use crate::model::physics::basal_melting_point;

    fn pure_ice_scale() -> ReferenceAgeScale {
        let samples: Vec<ReferenceSample> = (0..4)
            .map(|i| ReferenceSample {
                depth: i as f64 * 1000.0,
                iedepth: i as f64 * 1000.0,
                accumulation: 0.03,
                age: i as f64 * 50_000.0,
                sigma_age: 100.0,
            })
            .collect();
        ReferenceAgeScale::new(&samples).unwrap()
    }

    fn column(thk: f64) -> ColumnGeometry {
        let grid = DepthGrid::new(0.02).unwrap();
        ColumnGeometry::new(&grid, thk, &pure_ice_scale()).unwrap()
    }

    #[test]
    fn transitions_have_no_hysteresis() {
        use BasalRegime::*;
        assert_eq!(next_regime(Temperate, 0.05, 270.0, 0.06, 271.0), Temperate);
        assert_eq!(next_regime(Temperate, 0.06, 271.0, 0.06, 271.0), Frozen);
        assert_eq!(next_regime(Frozen, 0.06, 270.9, 0.06, 271.0), Frozen);
        assert_eq!(next_regime(Frozen, 0.06, 271.1, 0.06, 271.0), Temperate);
        // Flux comparison never moves a frozen bed; temperature never moves a temperate one.
        assert_eq!(next_regime(Frozen, 1.0, 200.0, 0.0, 271.0), Frozen);
        assert_eq!(next_regime(Temperate, 0.0, 400.0, 1.0, 271.0), Temperate);
    }

    #[test]
    fn analytic_seed_honours_surface_and_base() {
        let geom = column(3000.0);
        let tf = basal_melting_point(geom.thkie);
        let hot = analytic_seed(&geom, 0.03, 218.0, 1.0, tf).unwrap();
        assert_eq!(hot.regime, BasalRegime::Temperate);
        assert!((hot.temperature[0] - 218.0).abs() < 1e-9);
        assert!((hot.temperature.last().unwrap() - tf).abs() < 1e-6);
        assert!(hot.melt > 0.0);

        let cold = analytic_seed(&geom, 0.03, 218.0, 0.0, tf).unwrap();
        assert_eq!(cold.regime, BasalRegime::Frozen);
        assert_eq!(cold.melt, 0.0);
        assert!(*cold.temperature.last().unwrap() < tf);
    }

    #[test]
    fn temperate_solve_pins_base_at_melting_point() {
        let geom = column(3000.0);
        let tf = basal_melting_point(geom.thkie);
        let uz = vec![-0.03 / crate::model::physics::SECONDS_PER_YEAR; geom.len()];
        let seed = analytic_seed(&geom, 0.03, 218.0, 0.08, tf).unwrap();
        let step = solve_temperature(
            BasalRegime::Temperate,
            &geom,
            &uz,
            &seed.temperature,
            ThermalBoundary {
                surface_temperature: 218.0,
                melting_point: tf,
                g0: 0.08,
            },
        )
        .unwrap();
        assert_eq!(*step.temperature.last().unwrap(), tf);
        assert_eq!(step.temperature[0], 218.0);
        assert!(step.flux > 0.0);
        assert!(step.temperature.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn temperate_flux_uses_solved_temperatures() {
        let geom = column(3000.0);
        let tf = basal_melting_point(geom.thkie);
        let uz = vec![-0.03 / crate::model::physics::SECONDS_PER_YEAR; geom.len()];
        // Lagged properties far from the solution.
        let previous = vec![230.0; geom.len()];
        let step = solve_temperature(
            BasalRegime::Temperate,
            &geom,
            &uz,
            &previous,
            ThermalBoundary {
                surface_temperature: 218.0,
                melting_point: tf,
                g0: 0.08,
            },
        )
        .unwrap();
        let n = geom.len();
        let t = &step.temperature;
        let k = conductivity((t[n - 2] + t[n - 1]) / 2.0, geom.density[n - 2]);
        let expected = -k * (t[n - 2] - t[n - 1]) / (geom.depthie[n - 1] - geom.depthie[n - 2]);
        assert!((step.flux - expected).abs() <= 1e-12 * expected.abs());
        assert_eq!(step.melt, melt_rate(0.08, step.flux));
    }

    #[test]
    fn frozen_solve_imposes_geothermal_gradient() {
        let geom = column(2000.0);
        let tf = basal_melting_point(geom.thkie);
        let uz = vec![-0.03 / crate::model::physics::SECONDS_PER_YEAR; geom.len()];
        let seed = analytic_seed(&geom, 0.03, 218.0, 0.03, tf).unwrap();
        let g0 = 0.03;
        let step = solve_temperature(
            BasalRegime::Frozen,
            &geom,
            &uz,
            &seed.temperature,
            ThermalBoundary {
                surface_temperature: 218.0,
                melting_point: tf,
                g0,
            },
        )
        .unwrap();
        assert_eq!(step.flux, g0);
        assert_eq!(step.melt, 0.0);
        let n = geom.len();
        let k = conductivity(
            (seed.temperature[n - 2] + seed.temperature[n - 1]) / 2.0,
            geom.density[n - 2],
        );
        let gradient = (step.temperature[n - 1] - step.temperature[n - 2]) / geom.step();
        assert!((k * gradient - g0).abs() < 1e-9);
    }
}

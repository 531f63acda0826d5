//! Finite-difference propagation of the fit covariance to derived outputs.
//!
//! The forward model is differentiated independently of the optimizer: the
//! only things passed in are the optimum and its covariance `C`. Each free
//! parameter is perturbed by `sqrt(C_ii) / 1e8`, i.e. relative to its own
//! estimated uncertainty, and the output vector
//!
//! ```text
//! [a, m, p', age(0..n), ln age(1..n), G0]
//! ```
//!
//! is central-differenced. Per output `k`, `sigma_k = sqrt(J_kᵀ C J_k)`.
//! Log-age gets its own block because it is better conditioned than
//! `sigma_age / age` near the surface.

use nalgebra::{DMatrix, DVector};

use crate::error::AppError;
use crate::fit::ColumnProblem;
use crate::fit::lm::fd_step;

/// Divisor applied to the standard deviation to obtain the perturbation step.
const STEP_DIVISOR: f64 = 1e8;

/// One-sigma uncertainties of a column's outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSigmas {
    pub accumulation: f64,
    pub melt: f64,
    pub pprime: f64,
    pub age: Vec<f64>,
    /// `sigma(ln age)`; the surface node is NaN.
    pub logage: Vec<f64>,
    pub g0: f64,
}

impl ColumnSigmas {
    /// All-NaN sigmas for `n` depth nodes (uncertainty not computed).
    pub fn undetermined(n: usize) -> Self {
        Self {
            accumulation: f64::NAN,
            melt: f64::NAN,
            pprime: f64::NAN,
            age: vec![f64::NAN; n],
            logage: vec![f64::NAN; n],
            g0: f64::NAN,
        }
    }
}

/// Perturbation for parameter `i`: `sqrt(C_ii) / 1e8`, or a relative step when
/// the variance is zero, infinite or undefined.
pub fn perturbation_step(variance: f64, value: f64) -> f64 {
    let step = variance.sqrt() / STEP_DIVISOR;
    if step.is_finite() && step > 0.0 {
        step
    } else {
        fd_step(value)
    }
}

/// Central-difference Jacobian of the output vector, one row per parameter.
pub fn output_jacobian(
    problem: &ColumnProblem<'_>,
    x: &[f64],
    covariance: &DMatrix<f64>,
) -> Result<DMatrix<f64>, AppError> {
    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let h = perturbation_step(covariance[(i, i)], x[i]);
        let mut plus = x.to_vec();
        plus[i] += h;
        let mut minus = x.to_vec();
        minus[i] -= h;
        let (up, _) = problem.evaluate(&plus)?;
        let (down, _) = problem.evaluate(&minus)?;
        let up = up.output_vector();
        let down = down.output_vector();
        rows.push(
            up.iter()
                .zip(down.iter())
                .map(|(u, d)| (u - d) / (2.0 * h))
                .collect(),
        );
    }
    let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
    Ok(DMatrix::from_fn(x.len(), ncols, |i, k| rows[i][k]))
}

/// `sqrt(J_kᵀ C J_k)` for every output column `k`.
///
/// Parameters with infinite variance make every output that depends on them
/// infinitely uncertain; outputs that do not depend on them are unaffected.
pub fn propagate(jac: &DMatrix<f64>, covariance: &DMatrix<f64>) -> Vec<f64> {
    let p = jac.nrows();
    let unbounded: Vec<bool> = (0..p).map(|i| covariance[(i, i)].is_infinite()).collect();
    let bounded: Vec<usize> = (0..p).filter(|&i| !unbounded[i]).collect();

    (0..jac.ncols())
        .map(|k| {
            let column = jac.column(k);
            if column.iter().any(|v| v.is_nan()) {
                return f64::NAN;
            }
            if (0..p).any(|i| unbounded[i] && column[i] != 0.0) {
                return f64::INFINITY;
            }
            let j = DVector::from_iterator(bounded.len(), bounded.iter().map(|&i| column[i]));
            let c = covariance.select_rows(bounded.iter()).select_columns(bounded.iter());
            let variance = (j.transpose() * c * &j)[(0, 0)];
            variance.max(0.0).sqrt()
        })
        .collect()
}

/// Uncertainty of every output of one column at the optimum `x`.
pub fn column_sigmas(
    problem: &ColumnProblem<'_>,
    x: &[f64],
    covariance: &DMatrix<f64>,
) -> Result<ColumnSigmas, AppError> {
    let n = problem.geom.len();
    let jac = output_jacobian(problem, x, covariance)?;
    let sigma = propagate(&jac, covariance);

    let mut logage = Vec::with_capacity(n);
    logage.push(f64::NAN);
    logage.extend_from_slice(&sigma[3 + n..3 + 2 * n - 1]);

    Ok(ColumnSigmas {
        accumulation: sigma[0],
        melt: sigma[1],
        pprime: sigma[2],
        age: sigma[3..3 + n].to_vec(),
        logage,
        g0: sigma[3 + 2 * n - 1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agescale::{ReferenceAgeScale, ReferenceSample};
    use crate::domain::{IsochroneAges, Priors};
    use crate::grid::{ColumnGeometry, DepthGrid};
    use crate::model::{ColumnParams, ForwardSettings};

    #[test]
    fn step_scales_with_uncertainty() {
        assert!((perturbation_step(1e-6, 0.03) - 1e-11).abs() < 1e-20);
        assert_eq!(perturbation_step(f64::INFINITY, 2.0), fd_step(2.0));
        assert_eq!(perturbation_step(0.0, 0.5), fd_step(0.5));
    }

    #[test]
    fn linear_propagation() {
        // Outputs: y0 = 2 x0, y1 = x0 + x1, y2 = x1.
        let jac = DMatrix::from_row_slice(2, 3, &[2.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
        let cov = DMatrix::from_row_slice(2, 2, &[0.25, 0.0, 0.0, 4.0]);
        let s = propagate(&jac, &cov);
        assert!((s[0] - 1.0).abs() < 1e-12);
        assert!((s[1] - (0.25_f64 + 4.0).sqrt()).abs() < 1e-12);
        assert!((s[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn infinite_variance_only_hits_dependent_outputs() {
        let jac = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 0.0]);
        let mut cov = DMatrix::zeros(2, 2);
        cov[(0, 0)] = 1.0;
        cov[(1, 1)] = f64::INFINITY;
        let s = propagate(&jac, &cov);
        assert!(s[0].is_infinite());
        assert_eq!(s[1], 0.0);
    }

    #[test]
    fn accumulation_sigma_is_its_own_standard_deviation() {
        let samples: Vec<ReferenceSample> = (0..5)
            .map(|i| ReferenceSample {
                depth: i as f64 * 1000.0,
                iedepth: i as f64 * 1000.0,
                accumulation: 0.02,
                age: i as f64 * 1e5,
                sigma_age: 100.0,
            })
            .collect();
        let scale = ReferenceAgeScale::new(&samples).unwrap();
        let geom = ColumnGeometry::new(&DepthGrid::new(0.05).unwrap(), 2500.0, &scale).unwrap();
        let ages = IsochroneAges::new(vec![20_000.0], vec![500.0]).unwrap();
        let iso = [500.0];
        let problem = ColumnProblem {
            geom: &geom,
            base: ColumnParams {
                accumulation: 0.025,
                pprime: 0.7,
                sliding: 0.0,
                g0: 0.05,
                surface_temperature: 220.0,
            },
            iso_depth: &iso,
            ages: &ages,
            priors: Priors {
                pprime: 0.7,
                pprime_sigma: 0.5,
                g0: 0.05,
                g0_sigma: 0.01,
            },
            invert_g0: false,
            settings: ForwardSettings {
                thermal_iterations: 4,
                age_surf: 0.0,
            },
            scale: &scale,
        };
        let cov = DMatrix::from_row_slice(2, 2, &[1e-6, 0.0, 0.0, 0.25]);
        let sig = column_sigmas(&problem, &[0.025, 0.7], &cov).unwrap();
        assert!((sig.accumulation - 1e-3).abs() < 1e-9);
        assert!((sig.pprime - 0.5).abs() < 1e-6);
        // G0 is held fixed.
        assert_eq!(sig.g0, 0.0);
        assert!(sig.logage[0].is_nan());
        assert_eq!(sig.age.len(), geom.len());
        assert_eq!(sig.age[0], 0.0);
        assert!(sig.age[10] > 0.0);
    }
}

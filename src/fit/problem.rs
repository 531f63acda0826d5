//! Residual functions of the inversion.
//!
//! A column's residual vector has a fixed layout:
//!
//! ```text
//! [ (age_k - modage_k) / sigma_k  for every isochrone k ,
//!   (p' - p'_prior) / sigma_p' ,
//!   (G0 - G0_prior) / sigma_G0      only when G0 is inverted ]
//! ```
//!
//! Isochrones whose modelled age is NaN (depth not picked, or below the
//! deepest computable age) leave a NaN entry, which the solver drops.
//!
//! The transect problem stacks every column: isochrone blocks location by
//! location, then all `p'` priors, then all `G0` priors. Parameters are laid
//! out as `[a_0..a_n, p'_0..p'_n, (G0_0..G0_n)]`.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use super::lm::{LeastSquaresProblem, forward_difference_jacobian};
use crate::agescale::ReferenceAgeScale;
use crate::domain::{IsochroneAges, Priors};
use crate::error::AppError;
use crate::grid::ColumnGeometry;
use crate::model::{ColumnParams, ColumnSolution, ForwardSettings, solve_column};

/// Inversion of a single column.
#[derive(Debug, Clone)]
pub struct ColumnProblem<'a> {
    pub geom: &'a ColumnGeometry,
    /// Parameters held fixed (sliding, surface temperature, and `G0` when not inverted).
    pub base: ColumnParams,
    pub iso_depth: &'a [f64],
    pub ages: &'a IsochroneAges,
    pub priors: Priors,
    pub invert_g0: bool,
    pub settings: ForwardSettings,
    pub scale: &'a ReferenceAgeScale,
}

impl<'a> ColumnProblem<'a> {
    pub fn num_free(&self) -> usize {
        if self.invert_g0 { 3 } else { 2 }
    }

    pub fn num_residuals(&self) -> usize {
        self.ages.len() + self.num_free() - 1
    }

    /// Initial free-parameter vector taken from `base`.
    pub fn initial_guess(&self) -> DVector<f64> {
        let mut x = vec![self.base.accumulation, self.base.pprime];
        if self.invert_g0 {
            x.push(self.base.g0);
        }
        DVector::from_vec(x)
    }

    pub fn params_from(&self, x: &[f64]) -> ColumnParams {
        ColumnParams {
            accumulation: x[0],
            pprime: x[1],
            g0: if self.invert_g0 { x[2] } else { self.base.g0 },
            ..self.base
        }
    }

    /// Forward solve at `x` and the model ages at the observed depths.
    pub fn evaluate(&self, x: &[f64]) -> Result<(ColumnSolution, Vec<f64>), AppError> {
        let params = self.params_from(x);
        let solution = solve_column(self.geom, params, self.settings, self.scale)?;
        let modage = solution.isochrone_ages(self.geom, self.iso_depth);
        Ok((solution, modage))
    }

    /// Weighted isochrone residuals (NaN where the model age is undefined).
    pub fn isochrone_residuals(&self, modage: &[f64]) -> Vec<f64> {
        modage
            .iter()
            .zip(self.ages.age.iter().zip(self.ages.sigma.iter()))
            .map(|(m, (age, sigma))| (age - m) / sigma)
            .collect()
    }

    pub fn prior_residuals(&self, params: &ColumnParams) -> Vec<f64> {
        let mut out = vec![(params.pprime - self.priors.pprime) / self.priors.pprime_sigma];
        if self.invert_g0 {
            out.push((params.g0 - self.priors.g0) / self.priors.g0_sigma);
        }
        out
    }

    fn local_residuals(&self, x: &[f64]) -> Result<(Vec<f64>, Vec<f64>), AppError> {
        let (solution, modage) = self.evaluate(x)?;
        Ok((
            self.isochrone_residuals(&modage),
            self.prior_residuals(&solution.params),
        ))
    }
}

impl LeastSquaresProblem for ColumnProblem<'_> {
    fn num_params(&self) -> usize {
        self.num_free()
    }

    fn residuals(&self, x: &DVector<f64>) -> Result<DVector<f64>, AppError> {
        let (mut iso, prior) = self.local_residuals(x.as_slice())?;
        iso.extend(prior);
        Ok(DVector::from_vec(iso))
    }
}

/// Joint inversion of every column of the transect.
#[derive(Debug, Clone)]
pub struct TransectProblem<'a> {
    pub columns: Vec<ColumnProblem<'a>>,
    pub invert_g0: bool,
}

impl<'a> TransectProblem<'a> {
    pub fn new(columns: Vec<ColumnProblem<'a>>, invert_g0: bool) -> Self {
        Self { columns, invert_g0 }
    }

    fn nbiso(&self) -> usize {
        self.columns.first().map(|c| c.ages.len()).unwrap_or(0)
    }

    fn blocks(&self) -> usize {
        if self.invert_g0 { 3 } else { 2 }
    }

    /// Global parameter index of local parameter `k` at location `j`.
    pub fn param_index(&self, j: usize, k: usize) -> usize {
        k * self.columns.len() + j
    }

    /// Local parameter vector of location `j`.
    pub fn local(&self, x: &DVector<f64>, j: usize) -> Vec<f64> {
        (0..self.blocks()).map(|k| x[self.param_index(j, k)]).collect()
    }

    pub fn initial_guess(&self) -> DVector<f64> {
        let n = self.columns.len();
        let mut x = DVector::zeros(self.blocks() * n);
        for (j, col) in self.columns.iter().enumerate() {
            for (k, v) in col.initial_guess().iter().enumerate() {
                x[self.param_index(j, k)] = *v;
            }
        }
        x
    }

    /// Global residual row of local residual `i` at location `j`.
    fn residual_row(&self, j: usize, i: usize) -> usize {
        let n = self.columns.len();
        let nbiso = self.nbiso();
        if i < nbiso {
            j * nbiso + i
        } else {
            n * nbiso + (i - nbiso) * n + j
        }
    }

    fn num_residuals(&self) -> usize {
        let n = self.columns.len();
        n * self.nbiso() + (self.blocks() - 1) * n
    }

    fn scatter(&self, locals: Vec<Vec<f64>>) -> DVector<f64> {
        let mut r = DVector::from_element(self.num_residuals(), f64::NAN);
        for (j, local) in locals.into_iter().enumerate() {
            for (i, v) in local.into_iter().enumerate() {
                r[self.residual_row(j, i)] = v;
            }
        }
        r
    }
}

impl LeastSquaresProblem for TransectProblem<'_> {
    fn num_params(&self) -> usize {
        self.blocks() * self.columns.len()
    }

    fn residuals(&self, x: &DVector<f64>) -> Result<DVector<f64>, AppError> {
        let locals = self
            .columns
            .par_iter()
            .enumerate()
            .map(|(j, col)| {
                let local = DVector::from_vec(self.local(x, j));
                col.residuals(&local).map(|r| r.as_slice().to_vec())
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.scatter(locals))
    }

    /// Block-diagonal Jacobian: a column's residuals depend only on its own parameters.
    fn jacobian(&self, x: &DVector<f64>, r0: &DVector<f64>) -> Result<DMatrix<f64>, AppError> {
        let blocks = self
            .columns
            .par_iter()
            .enumerate()
            .map(|(j, col)| {
                let local_x = DVector::from_vec(self.local(x, j));
                let local_r0 = DVector::from_iterator(
                    col.num_residuals(),
                    (0..col.num_residuals()).map(|i| r0[self.residual_row(j, i)]),
                );
                forward_difference_jacobian(|v| col.residuals(v), &local_x, &local_r0)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut jac = DMatrix::zeros(r0.len(), self.num_params());
        for (j, block) in blocks.iter().enumerate() {
            for i in 0..block.nrows() {
                for k in 0..block.ncols() {
                    jac[(self.residual_row(j, i), self.param_index(j, k))] = block[(i, k)];
                }
            }
        }
        Ok(jac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agescale::ReferenceSample;
    use crate::grid::DepthGrid;

    fn scale() -> ReferenceAgeScale {
        let samples: Vec<ReferenceSample> = (0..5)
            .map(|i| ReferenceSample {
                depth: i as f64 * 1000.0,
                iedepth: i as f64 * 1000.0,
                accumulation: 0.02,
                age: i as f64 * 1e5,
                sigma_age: 100.0,
            })
            .collect();
        ReferenceAgeScale::new(&samples).unwrap()
    }

    #[test]
    fn residual_layout_for_joint_problem() {
        let scale = scale();
        let grid = DepthGrid::new(0.05).unwrap();
        let geoms: Vec<ColumnGeometry> = [2000.0, 2200.0]
            .iter()
            .map(|&t| ColumnGeometry::new(&grid, t, &scale).unwrap())
            .collect();
        let ages = IsochroneAges::new(vec![10_000.0, 40_000.0, 1e7], vec![100.0, 200.0, 300.0]).unwrap();
        let depths = [vec![180.0, 700.0, 1900.0], vec![200.0, f64::NAN, 2100.0]];
        let priors = Priors {
            pprime: 0.5,
            pprime_sigma: 1.0,
            g0: 0.05,
            g0_sigma: 0.01,
        };
        let columns: Vec<ColumnProblem> = geoms
            .iter()
            .zip(depths.iter())
            .map(|(geom, d)| ColumnProblem {
                geom,
                base: ColumnParams {
                    accumulation: 0.02,
                    pprime: 1.0,
                    sliding: 0.0,
                    g0: 0.05,
                    surface_temperature: 218.0,
                },
                iso_depth: d,
                ages: &ages,
                priors,
                invert_g0: true,
                settings: ForwardSettings {
                    thermal_iterations: 3,
                    age_surf: 0.0,
                },
                scale: &scale,
            })
            .collect();
        let problem = TransectProblem::new(columns, true);
        assert_eq!(problem.num_params(), 6);

        let x = problem.initial_guess();
        assert_eq!(x.as_slice(), &[0.02, 0.02, 1.0, 1.0, 0.05, 0.05]);

        let r = problem.residuals(&x).unwrap();
        assert_eq!(r.len(), 2 * 3 + 2 + 2);
        // Missing pick at location 1, isochrone 1.
        assert!(r[4].is_nan());
        assert!(r[0].is_finite());
        // p' priors, then G0 priors.
        assert!((r[6] - 0.5).abs() < 1e-12);
        assert!((r[7] - 0.5).abs() < 1e-12);
        assert!(r[8].abs() < 1e-12);

        let jac = problem.jacobian(&x, &r).unwrap();
        // Location 0 residuals never depend on location 1 parameters.
        for i in 0..3 {
            assert_eq!(jac[(i, 1)], 0.0);
            assert_eq!(jac[(i, 3)], 0.0);
        }
        assert!((jac[(6, 2)] - 1.0).abs() < 1e-6);
    }
}

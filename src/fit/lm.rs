//! Levenberg–Marquardt nonlinear least squares.
//!
//! Minimises `Σ r_i(x)²` for a [`LeastSquaresProblem`]. Residual entries that
//! evaluate to NaN are *dropped*: they contribute nothing to the cost and their
//! Jacobian rows are zeroed. This keeps the residual vector a fixed length
//! while observations come and go with the parameters (an isochrone that
//! falls below the column simply stops counting).
//!
//! Algorithm per iteration:
//!
//! 1. build `J` (forward differences unless the problem overrides it)
//! 2. solve `(JᵀJ + λ D) δ = -Jᵀr` with `D = diag(JᵀJ)` (floored)
//! 3. accept if the cost decreases (`λ *= lambda_down`), otherwise reject
//!    (`λ *= lambda_up`) and retry
//!
//! A trial point where the model itself fails (e.g. a non-positive
//! accumulation) counts as a rejected step.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::math::{covariance_from_jacobian, solve_least_squares};

/// Damping above which the solver gives up.
const LAMBDA_MAX: f64 = 1e16;
const LAMBDA_MIN: f64 = 1e-15;

/// A residual function of a parameter vector.
pub trait LeastSquaresProblem {
    fn num_params(&self) -> usize;

    /// Weighted residuals; NaN marks an entry to drop.
    fn residuals(&self, x: &DVector<f64>) -> Result<DVector<f64>, AppError>;

    /// Jacobian of [`Self::residuals`] at `x`, given `r0 = residuals(x)`.
    fn jacobian(&self, x: &DVector<f64>, r0: &DVector<f64>) -> Result<DMatrix<f64>, AppError> {
        forward_difference_jacobian(|v| self.residuals(v), x, r0)
    }
}

/// Forward-difference Jacobian with step `sqrt(eps) * max(|x_j|, 1)`.
pub fn forward_difference_jacobian<F>(
    f: F,
    x: &DVector<f64>,
    r0: &DVector<f64>,
) -> Result<DMatrix<f64>, AppError>
where
    F: Fn(&DVector<f64>) -> Result<DVector<f64>, AppError>,
{
    let mut jac = DMatrix::zeros(r0.len(), x.len());
    for j in 0..x.len() {
        let h = fd_step(x[j]);
        let mut xp = x.clone();
        xp[j] += h;
        let rp = f(&xp)?;
        for i in 0..r0.len() {
            jac[(i, j)] = (rp[i] - r0[i]) / h;
        }
    }
    Ok(jac)
}

pub fn fd_step(x: f64) -> f64 {
    f64::EPSILON.sqrt() * x.abs().max(1.0)
}

/// Solver settings (the `optimizer` block of the run configuration).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    pub max_iterations: usize,
    /// Relative cost reduction below which the fit is converged.
    pub ftol: f64,
    /// Relative step size below which the fit is converged.
    pub xtol: f64,
    /// Cosine between residual and Jacobian columns below which the fit is converged.
    pub gtol: f64,
    pub lambda_init: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            ftol: 1.49012e-8,
            xtol: 1.49012e-8,
            gtol: 0.0,
            lambda_init: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

/// Why the solver stopped. Codes follow the MINPACK convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    CostConverged,
    StepConverged,
    GradientConverged,
    MaxIterations,
    LambdaOverflow,
}

impl Termination {
    pub fn code(self) -> i32 {
        match self {
            Termination::CostConverged => 1,
            Termination::StepConverged => 2,
            Termination::GradientConverged => 4,
            Termination::MaxIterations => 5,
            Termination::LambdaOverflow => 6,
        }
    }

    pub fn converged(self) -> bool {
        matches!(
            self,
            Termination::CostConverged | Termination::StepConverged | Termination::GradientConverged
        )
    }

    pub fn message(self) -> &'static str {
        match self {
            Termination::CostConverged => "relative reduction of the cost is at most ftol",
            Termination::StepConverged => "relative change of the parameters is at most xtol",
            Termination::GradientConverged => "residuals are orthogonal to the Jacobian columns",
            Termination::MaxIterations => "maximum number of iterations reached",
            Termination::LambdaOverflow => "no cost reduction possible (damping overflow)",
        }
    }
}

/// Best-effort optimum and its covariance.
#[derive(Debug, Clone)]
pub struct LmResult {
    pub params: DVector<f64>,
    /// `(JᵀJ)⁻¹` at `params`; unconstrained parameters have infinite variance.
    pub covariance: DMatrix<f64>,
    pub residuals: DVector<f64>,
    /// Sum of squared (non-dropped) residuals.
    pub cost: f64,
    pub iterations: usize,
    pub termination: Termination,
}

/// Minimise the problem's cost starting from `x0`.
pub fn levenberg_marquardt<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    x0: DVector<f64>,
    config: &LmConfig,
) -> Result<LmResult, AppError> {
    if x0.len() != problem.num_params() {
        return Err(AppError::input(format!(
            "Initial guess has {} parameters, problem expects {}.",
            x0.len(),
            problem.num_params()
        )));
    }

    let mut x = x0;
    let mut r = problem.residuals(&x)?;
    let mut cost = masked_cost(&r);
    let mut lambda = config.lambda_init;
    let mut iterations = 0;
    let termination;

    'outer: loop {
        if iterations >= config.max_iterations {
            termination = Termination::MaxIterations;
            break;
        }
        if cost == 0.0 {
            termination = Termination::GradientConverged;
            break;
        }

        let jac = masked_jacobian(problem.jacobian(&x, &r)?, &r);
        let rm = masked_residuals(&r);
        let jtj = jac.transpose() * &jac;
        let grad = jac.transpose() * &rm;

        if gradient_cosine(&jac, &rm) <= config.gtol {
            termination = Termination::GradientConverged;
            break;
        }

        let max_diag = (0..jtj.nrows()).fold(0.0_f64, |m, i| m.max(jtj[(i, i)]));
        let diag_floor = (max_diag * 1e-12).max(f64::MIN_POSITIVE);

        iterations += 1;
        loop {
            let mut damped = jtj.clone();
            for i in 0..damped.nrows() {
                damped[(i, i)] += lambda * jtj[(i, i)].max(diag_floor);
            }
            let rhs = -&grad;
            let step = match damped.clone().cholesky() {
                Some(chol) => chol.solve(&rhs),
                None => match solve_least_squares(&damped, &rhs) {
                    Some(s) => s,
                    None => {
                        termination = Termination::LambdaOverflow;
                        break 'outer;
                    }
                },
            };

            let trial = &x + &step;
            let accepted = match problem.residuals(&trial) {
                Ok(r_trial) => {
                    let cost_trial = masked_cost(&r_trial);
                    if cost_trial.is_finite() && cost_trial < cost {
                        let reduction = cost - cost_trial;
                        let step_norm = step.norm();
                        let x_norm = trial.norm();
                        x = trial;
                        r = r_trial;
                        cost = cost_trial;
                        lambda = (lambda * config.lambda_down).max(LAMBDA_MIN);

                        if reduction <= config.ftol * (cost + reduction) {
                            termination = Termination::CostConverged;
                            break 'outer;
                        }
                        if step_norm <= config.xtol * (x_norm + config.xtol) {
                            termination = Termination::StepConverged;
                            break 'outer;
                        }
                        true
                    } else {
                        false
                    }
                }
                Err(err) => {
                    log::trace!("Rejected trial step: {err}");
                    false
                }
            };

            if accepted {
                break;
            }
            if step.norm() <= config.xtol * (x.norm() + config.xtol) {
                termination = Termination::StepConverged;
                break 'outer;
            }
            lambda *= config.lambda_up;
            if lambda > LAMBDA_MAX {
                termination = Termination::LambdaOverflow;
                break 'outer;
            }
        }
    }

    let jac = masked_jacobian(problem.jacobian(&x, &r)?, &r);
    let covariance = covariance_from_jacobian(&jac);

    Ok(LmResult {
        params: x,
        covariance,
        residuals: r,
        cost,
        iterations,
        termination,
    })
}

/// Sum of squares over finite entries.
pub fn masked_cost(r: &DVector<f64>) -> f64 {
    r.iter().filter(|v| v.is_finite()).map(|v| v * v).sum()
}

fn masked_residuals(r: &DVector<f64>) -> DVector<f64> {
    r.map(|v| if v.is_finite() { v } else { 0.0 })
}

/// Zero the rows of dropped residuals and any non-finite derivative.
fn masked_jacobian(mut jac: DMatrix<f64>, r: &DVector<f64>) -> DMatrix<f64> {
    for i in 0..jac.nrows() {
        let dropped = !r[i].is_finite();
        for j in 0..jac.ncols() {
            if dropped || !jac[(i, j)].is_finite() {
                jac[(i, j)] = 0.0;
            }
        }
    }
    jac
}

/// Largest `|J_jᵀ r| / (‖J_j‖ ‖r‖)` over the columns.
fn gradient_cosine(jac: &DMatrix<f64>, r: &DVector<f64>) -> f64 {
    let r_norm = r.norm();
    if r_norm == 0.0 {
        return 0.0;
    }
    (0..jac.ncols())
        .map(|j| {
            let col = jac.column(j);
            let col_norm = col.norm();
            if col_norm == 0.0 {
                0.0
            } else {
                (col.dot(r) / (col_norm * r_norm)).abs()
            }
        })
        .fold(0.0_f64, f64::max)
}

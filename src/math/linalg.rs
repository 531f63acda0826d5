//! Small dense and banded linear solves.
//!
//! - the vertical heat equation discretises to a tridiagonal system, solved
//!   with the Thomas algorithm (no pivoting; a vanishing pivot is reported as
//!   singular)
//! - least-squares steps and covariances go through nalgebra's SVD with a
//!   ladder of progressively looser tolerances

use nalgebra::{DMatrix, DVector};

use crate::error::AppError;

/// Tridiagonal system `A x = rhs`.
///
/// Row `i` reads `lower[i] x[i-1] + diag[i] x[i] + upper[i] x[i+1]`;
/// `lower[0]` and `upper[n-1]` are ignored.
#[derive(Debug, Clone)]
pub struct Tridiagonal {
    pub lower: Vec<f64>,
    pub diag: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Tridiagonal {
    pub fn zeros(n: usize) -> Self {
        Self {
            lower: vec![0.0; n],
            diag: vec![0.0; n],
            upper: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.diag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }

    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>, AppError> {
        let n = self.len();
        if rhs.len() != n || self.lower.len() != n || self.upper.len() != n {
            return Err(AppError::numeric(format!(
                "Tridiagonal system shape mismatch: {n} rows, rhs of length {}.",
                rhs.len()
            )));
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        let scale = self
            .diag
            .iter()
            .chain(self.lower.iter())
            .chain(self.upper.iter())
            .fold(0.0_f64, |m, v| m.max(v.abs()));
        let tiny = scale * 1e-14;

        let mut c = vec![0.0; n];
        let mut d = vec![0.0; n];
        let mut pivot = self.diag[0];
        if !(pivot.abs() > tiny) {
            return Err(singular(0));
        }
        c[0] = self.upper[0] / pivot;
        d[0] = rhs[0] / pivot;
        for i in 1..n {
            pivot = self.diag[i] - self.lower[i] * c[i - 1];
            if !(pivot.abs() > tiny) {
                return Err(singular(i));
            }
            c[i] = if i + 1 < n { self.upper[i] / pivot } else { 0.0 };
            d[i] = (rhs[i] - self.lower[i] * d[i - 1]) / pivot;
        }

        let mut x = d;
        for i in (0..n - 1).rev() {
            x[i] -= c[i] * x[i + 1];
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(AppError::numeric("Tridiagonal solve produced non-finite values."));
        }
        Ok(x)
    }
}

fn singular(row: usize) -> AppError {
    AppError::numeric(format!("Singular tridiagonal system (zero pivot at row {row})."))
}

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = a.clone().svd(true, true);
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(x) = svd.solve(b, tol) {
            if x.iter().all(|v| v.is_finite()) {
                return Some(x);
            }
        }
    }
    None
}

/// Parameter covariance `(JᵀJ)⁻¹` from a weighted Jacobian.
///
/// Parameters whose Jacobian column is identically zero are unconstrained by
/// the data: they get infinite variance and zero covariance with everything
/// else. The remaining block is inverted with an SVD pseudo-inverse.
pub fn covariance_from_jacobian(jac: &DMatrix<f64>) -> DMatrix<f64> {
    let n = jac.ncols();
    let mut cov = DMatrix::zeros(n, n);
    let constrained: Vec<usize> = (0..n)
        .filter(|&j| jac.column(j).iter().any(|v| *v != 0.0 && v.is_finite()))
        .collect();

    for j in 0..n {
        if !constrained.contains(&j) {
            cov[(j, j)] = f64::INFINITY;
        }
    }
    if constrained.is_empty() {
        return cov;
    }

    let sub = jac.select_columns(constrained.iter());
    let jtj = sub.transpose() * &sub;
    let inv = pseudo_inverse(&jtj);
    for (a, &ia) in constrained.iter().enumerate() {
        for (b, &ib) in constrained.iter().enumerate() {
            cov[(ia, ib)] = inv[(a, b)];
        }
    }
    cov
}

fn pseudo_inverse(m: &DMatrix<f64>) -> DMatrix<f64> {
    let svd = m.clone().svd(true, true);
    let max_sv = svd.singular_values.iter().fold(0.0_f64, |a, &s| a.max(s));
    for &rel in &[1e-14, 1e-12, 1e-10] {
        if let Ok(inv) = svd.clone().pseudo_inverse(max_sv * rel) {
            if inv.iter().all(|v| v.is_finite()) {
                return inv;
            }
        }
    }
    DMatrix::from_element(m.nrows(), m.ncols(), f64::NAN)
}

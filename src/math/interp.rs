//! Point interpolation on sorted abscissae.
//!
//! Semantics match what the age pipeline needs:
//! - linear between bracketing samples
//! - NaN outside `[x_first, x_last]` (no silent extrapolation)
//! - NaN if either bracketing ordinate is NaN
//!
//! Extrapolation, where wanted, is obtained by appending sentinel samples far
//! outside the physical range (see [`Interp1d::with_sentinels`]).

use crate::error::AppError;

/// Linear interpolation on a strictly increasing abscissa.
///
/// Does not validate its inputs; `x` must be sorted ascending.
pub fn interp_sorted(x: &[f64], y: &[f64], q: f64) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 || !q.is_finite() {
        return f64::NAN;
    }
    if n == 1 {
        return if q == x[0] { y[0] } else { f64::NAN };
    }
    if q < x[0] || q > x[n - 1] {
        return f64::NAN;
    }

    // First index with x[i] > q, clamped so that (i-1, i) is a valid bracket.
    let i = x[..n].partition_point(|&v| v <= q).clamp(1, n - 1);
    let (x0, x1) = (x[i - 1], x[i]);
    let (y0, y1) = (y[i - 1], y[i]);
    if x1 == x0 {
        return y0;
    }
    let u = (q - x0) / (x1 - x0);
    y0 + u * (y1 - y0)
}

/// Validated piecewise-linear lookup table.
#[derive(Debug, Clone)]
pub struct Interp1d {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Interp1d {
    /// Build a lookup; `x` must be finite and strictly increasing.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self, AppError> {
        if x.len() != y.len() {
            return Err(AppError::input(format!(
                "Interpolation table length mismatch: {} abscissae vs {} ordinates.",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(AppError::input("Interpolation table needs at least two samples."));
        }
        if let Some(i) = first_non_increasing(&x) {
            return Err(AppError::input(format!(
                "Interpolation abscissa is not strictly increasing at index {i} ({} -> {}).",
                x[i - 1],
                x[i]
            )));
        }
        Ok(Self { x, y })
    }

    /// Build a lookup extended by one sentinel sample on each side.
    ///
    /// Queries slightly outside the physical range then degrade into a linear
    /// ramp towards the sentinel instead of returning NaN.
    pub fn with_sentinels(
        x: &[f64],
        y: &[f64],
        lower: Option<(f64, f64)>,
        upper: Option<(f64, f64)>,
    ) -> Result<Self, AppError> {
        let mut xs = Vec::with_capacity(x.len() + 2);
        let mut ys = Vec::with_capacity(y.len() + 2);
        if let Some((xl, yl)) = lower {
            xs.push(xl);
            ys.push(yl);
        }
        xs.extend_from_slice(x);
        ys.extend_from_slice(y);
        if let Some((xu, yu)) = upper {
            xs.push(xu);
            ys.push(yu);
        }
        Self::new(xs, ys)
    }

    pub fn eval(&self, q: f64) -> f64 {
        interp_sorted(&self.x, &self.y, q)
    }

    pub fn eval_many(&self, qs: &[f64]) -> Vec<f64> {
        qs.iter().map(|&q| self.eval(q)).collect()
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }
}

/// Index of the first sample that does not strictly increase (or is not finite).
pub fn first_non_increasing(x: &[f64]) -> Option<usize> {
    if let Some(i) = x.iter().position(|v| !v.is_finite()) {
        return Some(i.max(1));
    }
    (1..x.len()).find(|&i| x[i] <= x[i - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_inside_and_nan_outside() {
        let x = [0.0, 1.0, 3.0];
        let y = [0.0, 10.0, 30.0];
        assert!((interp_sorted(&x, &y, 0.5) - 5.0).abs() < 1e-12);
        assert!((interp_sorted(&x, &y, 2.0) - 20.0).abs() < 1e-12);
        assert!((interp_sorted(&x, &y, 3.0) - 30.0).abs() < 1e-12);
        assert!((interp_sorted(&x, &y, 0.0) - 0.0).abs() < 1e-12);
        assert!(interp_sorted(&x, &y, -0.1).is_nan());
        assert!(interp_sorted(&x, &y, 3.1).is_nan());
        assert!(interp_sorted(&x, &y, f64::NAN).is_nan());
    }

    #[test]
    fn nan_ordinate_poisons_adjacent_segments_only() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [0.0, f64::NAN, 2.0, 3.0];
        assert!(interp_sorted(&x, &y, 0.5).is_nan());
        assert!(interp_sorted(&x, &y, 1.5).is_nan());
        assert!((interp_sorted(&x, &y, 2.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn sentinels_extend_range() {
        let f = Interp1d::with_sentinels(
            &[0.0, 10.0],
            &[0.0, 10.0],
            Some((-1e9, 0.0)),
            Some((1e6 * 10.0, 1e6 * 10.0)),
        )
        .unwrap();
        assert_eq!(f.eval(-5.0), 0.0);
        assert!((f.eval(20.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_unsorted_abscissa() {
        let err = Interp1d::new(vec![0.0, 2.0, 1.0], vec![0.0; 3]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}

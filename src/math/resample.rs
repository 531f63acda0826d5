//! Interval-averaging resampling of irregular profiles onto a regular grid.
//!
//! Each output cell `[e_i, e_{i+1}]` receives the integral of the piecewise
//! function over the part of the cell that has valid data, divided by the
//! width of that part. Digitised bed and reflector picks are irregular and
//! noisy, so averaging over the cell rather than point-sampling avoids aliasing.
//!
//! The pipeline is the same for both flavours:
//!
//! 1. mask: drop samples whose abscissa is NaN, and mark pieces whose
//!    ordinate(s) are NaN as having no coverage;
//! 2. integrate the valid pieces over the cell and divide by the covered width.
//!
//! A cell with zero covered width is NaN.

use crate::error::AppError;

/// Output cell edges centred on `centers` with uniform `resolution`.
///
/// Returns `centers.len() + 1` edges.
pub fn cell_edges(centers: &[f64], resolution: f64) -> Vec<f64> {
    let half = resolution / 2.0;
    let mut edges: Vec<f64> = centers.iter().map(|c| c - half).collect();
    if let Some(&last) = centers.last() {
        edges.push(last + half);
    }
    edges
}

/// Staircase averaging: the raw value `y_k` holds on `[x_k, x_{k+1})`.
///
/// Cells not entirely inside the raw abscissa span are NaN.
pub fn stair_average(x: &[f64], y: &[f64], edges: &[f64]) -> Result<Vec<f64>, AppError> {
    let (xs, ys) = mask_abscissa(x, y)?;
    validate_edges(edges)?;

    let mut out = vec![f64::NAN; edges.len().saturating_sub(1)];
    if xs.len() < 2 {
        return Ok(out);
    }
    let span_lo = xs[0];
    let span_hi = xs[xs.len() - 1];

    for (i, cell) in out.iter_mut().enumerate() {
        let (lo, hi) = (edges[i], edges[i + 1]);
        if lo < span_lo || hi > span_hi {
            continue;
        }

        let mut integral = 0.0;
        let mut covered = 0.0;
        // First piece whose right end is beyond `lo`.
        let start = xs.partition_point(|&v| v <= lo).saturating_sub(1);
        for k in start..xs.len() - 1 {
            if xs[k] >= hi {
                break;
            }
            if !ys[k].is_finite() {
                continue;
            }
            let a = xs[k].max(lo);
            let b = xs[k + 1].min(hi);
            if b > a {
                integral += ys[k] * (b - a);
                covered += b - a;
            }
        }
        if covered > 0.0 {
            *cell = integral / covered;
        }
    }
    Ok(out)
}

/// Piecewise-linear averaging: the profile is linear between consecutive samples.
///
/// A segment contributes only where both of its end values are finite; cells
/// partially outside the raw span are averaged over their covered part.
pub fn linear_average(x: &[f64], y: &[f64], edges: &[f64]) -> Result<Vec<f64>, AppError> {
    let (xs, ys) = mask_abscissa(x, y)?;
    validate_edges(edges)?;

    let mut out = vec![f64::NAN; edges.len().saturating_sub(1)];
    if xs.len() < 2 {
        return Ok(out);
    }

    for (i, cell) in out.iter_mut().enumerate() {
        let (lo, hi) = (edges[i], edges[i + 1]);
        let mut integral = 0.0;
        let mut covered = 0.0;
        let start = xs.partition_point(|&v| v <= lo).saturating_sub(1);
        for k in start..xs.len() - 1 {
            let (x0, x1) = (xs[k], xs[k + 1]);
            if x0 >= hi {
                break;
            }
            let (y0, y1) = (ys[k], ys[k + 1]);
            if !(y0.is_finite() && y1.is_finite()) {
                continue;
            }
            let a = x0.max(lo);
            let b = x1.min(hi);
            if b <= a {
                continue;
            }
            let slope = (y1 - y0) / (x1 - x0);
            let ya = y0 + slope * (a - x0);
            let yb = y0 + slope * (b - x0);
            integral += 0.5 * (ya + yb) * (b - a);
            covered += b - a;
        }
        if covered > 0.0 {
            *cell = integral / covered;
        }
    }
    Ok(out)
}

/// Drop samples with a NaN abscissa and check that the rest is sorted.
fn mask_abscissa(x: &[f64], y: &[f64]) -> Result<(Vec<f64>, Vec<f64>), AppError> {
    if x.len() != y.len() {
        return Err(AppError::input(format!(
            "Resampling input length mismatch: {} abscissae vs {} values.",
            x.len(),
            y.len()
        )));
    }
    let (xs, ys): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y.iter())
        .filter(|(xi, _)| xi.is_finite())
        .map(|(&xi, &yi)| (xi, yi))
        .unzip();
    if let Some(i) = (1..xs.len()).find(|&i| xs[i] <= xs[i - 1]) {
        return Err(AppError::input(format!(
            "Raw distance axis is not strictly increasing ({} then {}).",
            xs[i - 1],
            xs[i]
        )));
    }
    Ok((xs, ys))
}

fn validate_edges(edges: &[f64]) -> Result<(), AppError> {
    if edges.len() < 2 {
        return Err(AppError::input("Resampling needs at least two cell edges."));
    }
    if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[1] <= w[0]) {
        return Err(AppError::input("Resampling cell edges must be finite and increasing."));
    }
    Ok(())
}

//! Formatted terminal output.
//!
//! We keep formatting code in one place so the model and inversion code stay
//! free of presentation concerns.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::derived::DerivedOutputs;
use crate::domain::InversionMode;
use crate::fit::LocationFit;
use crate::grid::Transect;

/// Inputs of the run summary.
#[derive(Debug, Clone, Copy)]
pub struct SummaryContext<'a> {
    pub label: &'a str,
    pub mode: InversionMode,
    pub generated: DateTime<Utc>,
    pub transect: &'a Transect,
    pub fits: &'a [LocationFit],
    pub derived: &'a DerivedOutputs,
}

/// Root-mean-square of the finite weighted isochrone residuals over all locations.
pub fn residual_rms(fits: &[LocationFit]) -> f64 {
    let (sum, count) = fits
        .iter()
        .flat_map(|fit| fit.iso_residuals.iter())
        .filter(|r| r.is_finite())
        .fold((0.0, 0usize), |(s, c), r| (s + r * r, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        (sum / count as f64).sqrt()
    }
}

/// Format the full run summary.
pub fn format_run_summary(ctx: &SummaryContext<'_>) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== agemodel - {} ===\n", ctx.label));
    out.push_str(&format!(
        "Generated: {}\n",
        ctx.generated.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("Mode: {}\n", ctx.mode.label()));
    let distances = ctx.transect.distances();
    out.push_str(&format!(
        "Locations: n={} | distance=[{:.2}, {:.2}] km | resolution={} km\n",
        ctx.transect.len(),
        distances.first().copied().unwrap_or(f64::NAN),
        distances.last().copied().unwrap_or(f64::NAN),
        ctx.transect.resolution
    ));

    let mut status: BTreeMap<&str, usize> = BTreeMap::new();
    let mut regimes: BTreeMap<&str, usize> = BTreeMap::new();
    let mut optimizer: BTreeMap<(i32, &str), usize> = BTreeMap::new();
    let mut unsettled = 0usize;
    for fit in ctx.fits {
        *status.entry(fit.status.label()).or_default() += 1;
        if let Some(solution) = &fit.solution {
            *regimes.entry(solution.regime.label()).or_default() += 1;
            if !solution.settled {
                unsettled += 1;
            }
        }
        if let Some(report) = &fit.optimizer {
            *optimizer.entry((report.code, report.message)).or_default() += 1;
        }
    }

    out.push_str("\nStatus:\n");
    for (label, count) in &status {
        out.push_str(&format!("- {label:<9} {count}\n"));
    }
    if !optimizer.is_empty() {
        out.push_str("\nOptimizer:\n");
        for ((code, message), count) in &optimizer {
            out.push_str(&format!("- code {code}: {message} ({count})\n"));
        }
    }
    out.push_str(&format!(
        "\nIsochrone residual RMS (sigma units): {:.3}\n",
        residual_rms(ctx.fits)
    ));

    out.push_str("\nBasal regime:\n");
    for (label, count) in &regimes {
        out.push_str(&format!("- {label:<9} {count}\n"));
    }
    if unsettled > 0 {
        out.push_str(&format!("- {unsettled} location(s) still switching regime\n"));
    }

    match &ctx.derived.max_basal {
        Some(max) => out.push_str(&format!(
            "\nMaximum basal age: {:.0} +- {:.0} yr at {:.2} km (lon {:.4}, lat {:.4})\n",
            max.age, max.sigma, max.distance, max.lon, max.lat
        )),
        None => out.push_str("\nMaximum basal age: undetermined\n"),
    }

    if let Some(reference) = &ctx.derived.reference {
        out.push_str(&format!("\nReference core ({:.2} km):\n", reference.distance));
        out.push_str(&format!("- thickness    {:.1} m\n", reference.thickness));
        out.push_str(&format!("- accumulation {:.5} m/yr\n", reference.accumulation));
        out.push_str(&format!("- melting      {:.6} m/yr\n", reference.melt));
        out.push_str(&format!("- p            {:.4}\n", reference.p));
        out.push_str(&format!(
            "- basal age    {:.0} +- {:.0} yr\n",
            reference.basal_age, reference.sigma_basal_age
        ));
    }

    out
}

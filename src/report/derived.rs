//! Quantities derived from the fitted columns: layer accumulation history,
//! basal ages, the oldest-ice location and the reference-core summary.

use crate::domain::IsochroneAges;
use crate::fit::LocationFit;
use crate::grid::Transect;
use crate::math::interp_sorted;

/// Age near the bed of one location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasalAge {
    pub age: f64,
    pub sigma: f64,
    pub sigma_logage: f64,
    /// Conservative (two-sigma in log space) lower bound.
    pub age_min: f64,
}

impl BasalAge {
    const UNDETERMINED: BasalAge = BasalAge {
        age: f64::NAN,
        sigma: f64::NAN,
        sigma_logage: f64::NAN,
        age_min: f64::NAN,
    };
}

/// Oldest basal age along the transect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxBasalAge {
    pub age: f64,
    pub sigma: f64,
    pub distance: f64,
    pub lon: f64,
    pub lat: f64,
}

/// Model state interpolated at the reference core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceSummary {
    pub distance: f64,
    pub thickness: f64,
    pub accumulation: f64,
    pub melt: f64,
    pub p: f64,
    pub basal_age: f64,
    pub sigma_basal_age: f64,
}

/// Everything the result tables and the summary need beyond the fits.
#[derive(Debug, Clone)]
pub struct DerivedOutputs {
    /// Steady accumulation per isochrone layer, one vector per location.
    pub layer_accumulation: Vec<Vec<f64>>,
    pub basal: Vec<BasalAge>,
    pub max_basal: Option<MaxBasalAge>,
    pub reference: Option<ReferenceSummary>,
}

pub fn derive_outputs(
    transect: &Transect,
    fits: &[LocationFit],
    ages: &IsochroneAges,
    age_surf: f64,
    bottom_offset: f64,
    reference_distance: Option<f64>,
) -> DerivedOutputs {
    let layer_accumulation = fits
        .iter()
        .map(|fit| layer_accumulation(fit, ages, age_surf))
        .collect();
    let basal: Vec<BasalAge> = fits.iter().map(|fit| basal_age(fit, bottom_offset)).collect();
    let max_basal = max_basal_age(transect, &basal);
    let reference = reference_distance.and_then(|d| reference_summary(transect, fits, &basal, d));

    DerivedOutputs {
        layer_accumulation,
        basal,
        max_basal,
        reference,
    }
}

/// `a · Δmodage / Δage` for every isochrone layer, the first layer starting at the surface age.
pub fn layer_accumulation(fit: &LocationFit, ages: &IsochroneAges, age_surf: f64) -> Vec<f64> {
    let Some(solution) = &fit.solution else {
        return vec![f64::NAN; ages.len()];
    };
    let a = solution.params.accumulation;
    (0..ages.len())
        .map(|k| {
            let (mod_prev, age_prev) = if k == 0 {
                (age_surf, age_surf)
            } else {
                (fit.iso_modage[k - 1], ages.age[k - 1])
            };
            a * (fit.iso_modage[k] - mod_prev) / (ages.age[k] - age_prev)
        })
        .collect()
}

/// Age, sigma and sigma-log-age read `bottom_offset` above the deepest node.
pub fn basal_age(fit: &LocationFit, bottom_offset: f64) -> BasalAge {
    let (Some(solution), Some(geom)) = (&fit.solution, &fit.geometry) else {
        return BasalAge::UNDETERMINED;
    };
    let depth = &geom.depth;
    let Some(&max_depth) = depth.last() else {
        return BasalAge::UNDETERMINED;
    };
    let at = max_depth - bottom_offset;
    let age = interp_sorted(depth, &solution.age, at);
    let sigma = interp_sorted(depth, &fit.sigmas.age, at);
    let sigma_logage = interp_sorted(&depth[1..], &fit.sigmas.logage[1..], at);
    BasalAge {
        age,
        sigma,
        sigma_logage,
        age_min: (age.ln() - 2.0 * sigma_logage).exp(),
    }
}

/// Location of the oldest basal age, ignoring undetermined locations.
pub fn max_basal_age(transect: &Transect, basal: &[BasalAge]) -> Option<MaxBasalAge> {
    let (j, best) = basal
        .iter()
        .enumerate()
        .filter(|(_, b)| b.age.is_finite())
        .max_by(|(_, a), (_, b)| a.age.total_cmp(&b.age))?;
    let distance = transect.locations[j].distance;
    let (lon, lat) = transect.coordinates_at(distance);
    Some(MaxBasalAge {
        age: best.age,
        sigma: best.sigma,
        distance,
        lon,
        lat,
    })
}

/// Interpolate the per-location results along distance at the reference core.
pub fn reference_summary(
    transect: &Transect,
    fits: &[LocationFit],
    basal: &[BasalAge],
    distance: f64,
) -> Option<ReferenceSummary> {
    let x = transect.distances();
    let along = |values: Vec<f64>| interp_sorted(&x, &values, distance);
    let param = |f: fn(&LocationFit) -> f64| along(fits.iter().map(f).collect());

    let summary = ReferenceSummary {
        distance,
        thickness: along(transect.locations.iter().map(|l| l.thk).collect()),
        accumulation: param(|fit| fit.solution.as_ref().map_or(f64::NAN, |s| s.params.accumulation)),
        melt: param(|fit| fit.solution.as_ref().map_or(f64::NAN, |s| s.melt)),
        p: param(|fit| fit.solution.as_ref().map_or(f64::NAN, |s| s.p)),
        basal_age: along(basal.iter().map(|b| b.age).collect()),
        sigma_basal_age: along(basal.iter().map(|b| b.sigma).collect()),
    };
    if summary.thickness.is_nan() {
        log::warn!("Reference distance {distance} km lies outside the modelled transect");
        return None;
    }
    log::info!(
        "At the reference core ({distance:.2} km): thickness {:.1} m, a={:.5} m/yr, m={:.6} m/yr, p={:.3}, basal age {:.0} +- {:.0} yr",
        summary.thickness,
        summary.accumulation,
        summary.melt,
        summary.p,
        summary.basal_age,
        summary.sigma_basal_age
    );
    Some(summary)
}

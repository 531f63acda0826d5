//! Regular along-track grid built from an irregular radar profile.
//!
//! Thickness is resampled by staircase averaging, isochrone depths by
//! piecewise-linear averaging, both over cells of width `resolution` centred on
//! the grid distances. Coordinates are point-interpolated.

use crate::error::AppError;
use crate::math::{Interp1d, cell_edges, interp_sorted, linear_average, stair_average};

/// Raw radar picks as read from disk (firn correction already applied).
#[derive(Debug, Clone, Default)]
pub struct RawRadar {
    pub lon: Vec<f64>,
    pub lat: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Along-track distance (km), strictly increasing.
    pub distance: Vec<f64>,
    pub thickness: Vec<f64>,
    pub bed_elevation: Option<Vec<f64>>,
    /// One series per isochrone, each aligned with `distance`.
    pub isochrones: Vec<Vec<f64>>,
}

impl RawRadar {
    pub fn len(&self) -> usize {
        self.distance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance.is_empty()
    }

    pub fn nbiso(&self) -> usize {
        self.isochrones.len()
    }

    /// Point interpolation of one isochrone's raw depth at `distance`.
    pub fn isochrone_depth_at(&self, iso: usize, distance: f64) -> f64 {
        self.isochrones
            .get(iso)
            .map(|series| interp_sorted(&self.distance, series, distance))
            .unwrap_or(f64::NAN)
    }
}

/// Requested extent of the regular grid; `None` means derived from the data.
#[derive(Debug, Clone, Copy)]
pub struct GridExtent {
    pub resolution: f64,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

/// One regular grid location.
#[derive(Debug, Clone)]
pub struct TransectLocation {
    pub distance: f64,
    pub lon: f64,
    pub lat: f64,
    pub thk: f64,
    /// Observed isochrone depths (NaN where not picked).
    pub iso_depth: Vec<f64>,
}

/// Resampled transect plus the raw coordinate lookups.
#[derive(Debug, Clone)]
pub struct Transect {
    pub resolution: f64,
    pub locations: Vec<TransectLocation>,
    lon: Interp1d,
    lat: Interp1d,
}

impl Transect {
    pub fn build(raw: &RawRadar, extent: GridExtent) -> Result<Self, AppError> {
        validate_raw(raw)?;
        if !(extent.resolution.is_finite() && extent.resolution > 0.0) {
            return Err(AppError::input(format!(
                "Resolution must be positive, got {}.",
                extent.resolution
            )));
        }

        let distance = regular_distances(raw, extent)?;
        let edges = cell_edges(&distance, extent.resolution);

        let thk = stair_average(&raw.distance, &raw.thickness, &edges)?;
        let iso_by_layer = raw
            .isochrones
            .iter()
            .map(|series| linear_average(&raw.distance, series, &edges))
            .collect::<Result<Vec<_>, _>>()?;

        let (dist_ok, lon_ok, lat_ok) = finite_coordinates(raw);
        let lon = Interp1d::new(dist_ok.clone(), lon_ok)?;
        let lat = Interp1d::new(dist_ok, lat_ok)?;

        let locations: Vec<TransectLocation> = distance
            .iter()
            .enumerate()
            .map(|(j, &d)| TransectLocation {
                distance: d,
                lon: lon.eval(d),
                lat: lat.eval(d),
                thk: thk[j],
                iso_depth: iso_by_layer.iter().map(|layer| layer[j]).collect(),
            })
            .collect();

        log::info!(
            "Transect grid: {} locations from {:.3} to {:.3} km (resolution {} km, {} isochrones)",
            locations.len(),
            distance[0],
            distance[distance.len() - 1],
            extent.resolution,
            raw.nbiso()
        );

        Ok(Self {
            resolution: extent.resolution,
            locations,
            lon,
            lat,
        })
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn distances(&self) -> Vec<f64> {
        self.locations.iter().map(|l| l.distance).collect()
    }

    /// Raw-interpolated longitude/latitude at any along-track distance.
    pub fn coordinates_at(&self, distance: f64) -> (f64, f64) {
        (self.lon.eval(distance), self.lat.eval(distance))
    }
}

fn validate_raw(raw: &RawRadar) -> Result<(), AppError> {
    let n = raw.distance.len();
    let columns = [
        ("longitude", raw.lon.len()),
        ("latitude", raw.lat.len()),
        ("x", raw.x.len()),
        ("y", raw.y.len()),
        ("thickness", raw.thickness.len()),
    ];
    for (name, len) in columns {
        if len != n {
            return Err(AppError::input(format!(
                "Radar column '{name}' has {len} rows, expected {n}."
            )));
        }
    }
    for (k, series) in raw.isochrones.iter().enumerate() {
        if series.len() != n {
            return Err(AppError::input(format!(
                "Isochrone {} has {} rows, expected {n}.",
                k + 1,
                series.len()
            )));
        }
    }
    if n < 2 {
        return Err(AppError::data("Radar profile needs at least two samples."));
    }
    Ok(())
}

/// Grid distances `start, start + res, ..., <= end`.
fn regular_distances(raw: &RawRadar, extent: GridExtent) -> Result<Vec<f64>, AppError> {
    let (min, max) = raw
        .distance
        .iter()
        .filter(|d| d.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &d| {
            (lo.min(d), hi.max(d))
        });
    if !(min.is_finite() && max.is_finite()) {
        return Err(AppError::data("Radar profile has no finite distances."));
    }

    let start = extent.start.unwrap_or_else(|| (min + 2.99).floor());
    let end = extent.end.unwrap_or_else(|| (max - 2.0).floor());
    if end < start {
        return Err(AppError::data(format!(
            "Empty distance grid: start {start} km is beyond end {end} km."
        )));
    }

    let count = ((end - start) / extent.resolution + 1e-9).floor() as usize + 1;
    Ok((0..count)
        .map(|k| start + k as f64 * extent.resolution)
        .collect())
}

fn finite_coordinates(raw: &RawRadar) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut d = Vec::with_capacity(raw.len());
    let mut lon = Vec::with_capacity(raw.len());
    let mut lat = Vec::with_capacity(raw.len());
    for i in 0..raw.len() {
        if raw.distance[i].is_finite() {
            d.push(raw.distance[i]);
            lon.push(raw.lon[i]);
            lat.push(raw.lat[i]);
        }
    }
    (d, lon, lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_line() -> RawRadar {
        let distance: Vec<f64> = (0..=40).map(|i| i as f64 * 0.5).collect();
        let n = distance.len();
        RawRadar {
            lon: distance.iter().map(|d| 120.0 + d * 0.01).collect(),
            lat: distance.iter().map(|d| -75.0 - d * 0.01).collect(),
            x: vec![0.0; n],
            y: vec![0.0; n],
            thickness: distance.iter().map(|d| 3000.0 + 10.0 * d).collect(),
            bed_elevation: None,
            isochrones: vec![
                distance.iter().map(|d| 800.0 + d).collect(),
                distance
                    .iter()
                    .map(|&d| if d > 12.0 { f64::NAN } else { 1500.0 })
                    .collect(),
            ],
            distance,
        }
    }

    #[test]
    fn auto_extent_trims_the_edges() {
        let raw = raw_line();
        let t = Transect::build(
            &raw,
            GridExtent {
                resolution: 1.0,
                start: None,
                end: None,
            },
        )
        .unwrap();
        // floor(0 + 2.99) = 2, floor(20 - 2) = 18.
        assert_eq!(t.locations[0].distance, 2.0);
        assert_eq!(t.locations.last().unwrap().distance, 18.0);
        assert_eq!(t.len(), 17);
    }

    #[test]
    fn resampled_fields_follow_the_raw_profile() {
        let raw = raw_line();
        let t = Transect::build(
            &raw,
            GridExtent {
                resolution: 1.0,
                start: Some(4.0),
                end: Some(16.0),
            },
        )
        .unwrap();
        let loc = &t.locations[0];
        assert_eq!(loc.distance, 4.0);
        // Staircase over [3.5, 4.5): samples 3.5 and 4.0 -> mean(3035, 3040).
        assert!((loc.thk - 3037.5).abs() < 1e-9);
        assert!((loc.iso_depth[0] - 804.0).abs() < 1e-9);
        assert!((loc.lon - 120.04).abs() < 1e-9);

        let last = t.locations.last().unwrap();
        assert!(last.iso_depth[1].is_nan());
        assert!((t.locations[8].iso_depth[1] - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn empty_extent_is_a_data_error() {
        let raw = raw_line();
        let err = Transect::build(
            &raw,
            GridExtent {
                resolution: 1.0,
                start: Some(10.0),
                end: Some(5.0),
            },
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn column_count_mismatch_is_fatal() {
        let mut raw = raw_line();
        raw.isochrones[1].pop();
        let err = Transect::build(
            &raw,
            GridExtent {
                resolution: 1.0,
                start: None,
                end: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}

//! Result tables.
//!
//! Every table is tab-separated with a `#`-prefixed header line and one row
//! per transect location (or per location and depth for `age.txt`).
//! Undetermined values are written as `nan`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agescale::ReferenceSample;
use crate::domain::{InversionMode, IsochroneAges};
use crate::error::AppError;
use crate::fit::LocationFit;
use crate::grid::{RawRadar, Transect};
use crate::io::config::RunConfig;
use crate::io::ingest::{AGES_FILE, RADAR_FILE, REFERENCE_FILE};
use crate::report::DerivedOutputs;

/// Machine-readable record of a run, written as `run.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest<'a> {
    pub tool: &'static str,
    pub version: &'static str,
    pub generated_at: DateTime<Utc>,
    pub label: &'a str,
    pub mode: InversionMode,
    pub locations: usize,
    pub locations_ok: usize,
    pub config: &'a RunConfig,
}

/// Everything written by [`write_results`].
#[derive(Debug, Clone, Copy)]
pub struct ResultTables<'a> {
    pub transect: &'a Transect,
    pub fits: &'a [LocationFit],
    pub ages: &'a IsochroneAges,
    pub derived: &'a DerivedOutputs,
    pub age_surf: f64,
}

struct TableWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl TableWriter {
    fn create(path: PathBuf) -> Result<Self, AppError> {
        let file = File::create(&path)
            .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    fn line(&mut self, text: &str) -> Result<(), AppError> {
        writeln!(self.out, "{text}")
            .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", self.path.display())))
    }

    fn header(&mut self, columns: &[&str]) -> Result<(), AppError> {
        self.line(&format!("#{}", columns.join("\t")))
    }

    fn row(&mut self, values: &[f64]) -> Result<(), AppError> {
        let cells: Vec<String> = values.iter().map(|v| format_value(*v)).collect();
        self.line(&cells.join("\t"))
    }

    fn finish(mut self) -> Result<PathBuf, AppError> {
        self.out
            .flush()
            .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", self.path.display())))?;
        Ok(self.path)
    }
}

/// `nan` for undetermined values, shortest round-trip representation otherwise.
pub fn format_value(v: f64) -> String {
    if v.is_nan() { "nan".to_string() } else { format!("{v}") }
}

/// Write every per-location result table into `dir`.
pub fn write_results(dir: &Path, tables: &ResultTables<'_>) -> Result<Vec<PathBuf>, AppError> {
    let written = vec![
        write_accumulation(dir, tables)?,
        write_parameter(dir, "m.txt", "melting(ice-m/yr)", "sigma_melting", tables, |fit| {
            (fit.solution.as_ref().map_or(f64::NAN, |s| s.melt), fit.sigmas.melt)
        })?,
        write_parameter(dir, "pprime.txt", "pprime", "sigma_pprime", tables, |fit| {
            (
                fit.solution.as_ref().map_or(f64::NAN, |s| s.params.pprime),
                fit.sigmas.pprime,
            )
        })?,
        write_parameter(dir, "G0.txt", "G0(W/m2)", "sigma_G0", tables, |fit| {
            (fit.solution.as_ref().map_or(f64::NAN, |s| s.params.g0), fit.sigmas.g0)
        })?,
        write_basal_age(dir, tables)?,
        write_age_profiles(dir, tables)?,
        write_fit_status(dir, tables)?,
    ];
    log::info!("Wrote {} result tables to {}", written.len(), dir.display());
    Ok(written)
}

fn write_accumulation(dir: &Path, tables: &ResultTables<'_>) -> Result<PathBuf, AppError> {
    let mut table = TableWriter::create(dir.join("a.txt"))?;
    let mut columns = vec![
        "LON".to_string(),
        "LAT".to_string(),
        "distance(km)".to_string(),
        "accu(ice-m/yr)".to_string(),
        "sigma_accu".to_string(),
    ];
    let ages = &tables.ages.age;
    for k in 0..ages.len() {
        let previous = if k == 0 { tables.age_surf } else { ages[k - 1] };
        columns.push(format!("layer{}kyr", ((ages[k] + previous) / 2000.0) as i64));
    }
    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
    table.header(&columns)?;

    for ((loc, fit), layers) in tables
        .transect
        .locations
        .iter()
        .zip(tables.fits)
        .zip(&tables.derived.layer_accumulation)
    {
        let a = fit.solution.as_ref().map_or(f64::NAN, |s| s.params.accumulation);
        let mut row = vec![loc.lon, loc.lat, loc.distance, a, fit.sigmas.accumulation];
        row.extend_from_slice(layers);
        table.row(&row)?;
    }
    table.finish()
}

fn write_parameter(
    dir: &Path,
    name: &str,
    value_column: &str,
    sigma_column: &str,
    tables: &ResultTables<'_>,
    value: impl Fn(&LocationFit) -> (f64, f64),
) -> Result<PathBuf, AppError> {
    let mut table = TableWriter::create(dir.join(name))?;
    table.header(&["LON", "LAT", "distance(km)", value_column, sigma_column])?;
    for (loc, fit) in tables.transect.locations.iter().zip(tables.fits) {
        let (v, sigma) = value(fit);
        table.row(&[loc.lon, loc.lat, loc.distance, v, sigma])?;
    }
    table.finish()
}

fn write_basal_age(dir: &Path, tables: &ResultTables<'_>) -> Result<PathBuf, AppError> {
    let mut table = TableWriter::create(dir.join("agebottom.txt"))?;
    table.header(&[
        "LON",
        "LAT",
        "distance(km)",
        "age(yr-b1950)",
        "sigma(yr)",
        "age-min(yr-b1950)",
    ])?;
    for (loc, basal) in tables.transect.locations.iter().zip(&tables.derived.basal) {
        table.row(&[loc.lon, loc.lat, loc.distance, basal.age, basal.sigma, basal.age_min])?;
    }
    table.finish()
}

fn write_age_profiles(dir: &Path, tables: &ResultTables<'_>) -> Result<PathBuf, AppError> {
    let mut table = TableWriter::create(dir.join("age.txt"))?;
    table.header(&[
        "distance(km)",
        "depth(m)",
        "age(yr-b1950)",
        "sigma_age(yr)",
        "sigma_logage",
        "temperature(K)",
        "thinning",
    ])?;
    for (loc, fit) in tables.transect.locations.iter().zip(tables.fits) {
        let (Some(solution), Some(geom)) = (&fit.solution, &fit.geometry) else {
            continue;
        };
        for i in 0..geom.len() {
            table.row(&[
                loc.distance,
                geom.depth[i],
                solution.age[i],
                fit.sigmas.age[i],
                fit.sigmas.logage[i],
                solution.temperature[i],
                solution.tau[i],
            ])?;
        }
    }
    table.finish()
}

fn write_fit_status(dir: &Path, tables: &ResultTables<'_>) -> Result<PathBuf, AppError> {
    let mut table = TableWriter::create(dir.join("fit.txt"))?;
    table.header(&[
        "distance(km)",
        "status",
        "code",
        "iterations",
        "cost",
        "isochrones_used",
        "regime",
        "settled",
    ])?;
    for (loc, fit) in tables.transect.locations.iter().zip(tables.fits) {
        let (code, iterations, cost) = match &fit.optimizer {
            Some(r) => (r.code.to_string(), r.iterations.to_string(), format_value(r.cost)),
            None => ("-".to_string(), "-".to_string(), "nan".to_string()),
        };
        let (regime, settled) = match &fit.solution {
            Some(s) => (s.regime.label(), if s.settled { "yes" } else { "no" }),
            None => ("-", "-"),
        };
        table.line(&format!(
            "{}\t{}\t{code}\t{iterations}\t{cost}\t{}\t{regime}\t{settled}",
            format_value(loc.distance),
            fit.status.label(),
            fit.isochrones_used()
        ))?;
    }
    table.finish()
}

/// Write the isochrone ages table (`ages.txt`) for reuse by later runs.
pub fn write_isochrone_ages(dir: &Path, ages: &IsochroneAges) -> Result<PathBuf, AppError> {
    let mut table = TableWriter::create(dir.join(AGES_FILE))?;
    table.header(&["age (yr BP)", "sigma_age (yr BP)"])?;
    for (age, sigma) in ages.age.iter().zip(&ages.sigma) {
        table.row(&[*age, *sigma])?;
    }
    table.finish()
}

/// Write a radar table in the layout `read_radar` expects.
pub fn write_radar(dir: &Path, raw: &RawRadar) -> Result<PathBuf, AppError> {
    let mut table = TableWriter::create(dir.join(RADAR_FILE))?;
    let mut columns = vec!["LON", "LAT", "x(m)", "y(m)", "distance(km)", "thickness(m)"];
    if raw.bed_elevation.is_some() {
        columns.push("bed_elevation(m)");
    }
    let names: Vec<String> = (1..=raw.nbiso()).map(|k| format!("iso{k}(m)")).collect();
    columns.extend(names.iter().map(String::as_str));
    table.header(&columns)?;

    for j in 0..raw.len() {
        let mut row = vec![
            raw.lon[j],
            raw.lat[j],
            raw.x[j],
            raw.y[j],
            raw.distance[j],
            raw.thickness[j],
        ];
        if let Some(bed) = &raw.bed_elevation {
            row.push(bed[j]);
        }
        row.extend(raw.isochrones.iter().map(|iso| iso[j]));
        table.row(&row)?;
    }
    table.finish()
}

/// Write a reference core table in the layout `read_reference` expects.
pub fn write_reference(dir: &Path, samples: &[ReferenceSample]) -> Result<PathBuf, AppError> {
    let mut table = TableWriter::create(dir.join(REFERENCE_FILE))?;
    table.header(&["depth(m)", "iedepth(m)", "accu(ice-m/yr)", "age(yr-b1950)", "sigma_age(yr)"])?;
    for s in samples {
        table.row(&[s.depth, s.iedepth, s.accumulation, s.age, s.sigma_age])?;
    }
    table.finish()
}

/// Write `run.json`.
pub fn write_manifest(dir: &Path, manifest: &RunManifest<'_>) -> Result<PathBuf, AppError> {
    let path = dir.join("run.json");
    let file = File::create(&path)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, manifest)
        .map_err(|e| AppError::input(format!("Failed to write run manifest: {e}")))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ingest::{read_isochrone_ages, read_table};

    #[test]
    fn values_are_written_as_nan_or_shortest_form() {
        assert_eq!(format_value(f64::NAN), "nan");
        assert_eq!(format_value(0.025), "0.025");
        assert_eq!(format_value(f64::INFINITY), "inf");
    }

    #[test]
    fn ages_table_round_trips_through_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let ages = IsochroneAges::new(vec![1000.0, 5500.5], vec![20.0, 80.0]).unwrap();
        let path = write_isochrone_ages(dir.path(), &ages).unwrap();
        let back = read_isochrone_ages(&path, '\t', 2).unwrap();
        assert_eq!(back, ages);
        assert_eq!(read_table(&path, '\t').unwrap().len(), 2);
    }

    #[test]
    fn manifest_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::default();
        let manifest = RunManifest {
            tool: "agemodel",
            version: "test",
            generated_at: DateTime::from_timestamp(0, 0).unwrap(),
            label: "line",
            mode: InversionMode::Joint,
            locations: 3,
            locations_ok: 2,
            config: &config,
        };
        let path = write_manifest(dir.path(), &manifest).unwrap();
        let value: serde_json::Value =
            serde_json::from_reader(File::open(path).unwrap()).unwrap();
        assert_eq!(value["mode"], "joint");
        assert_eq!(value["config"]["dzeta"], 0.01);
        assert_eq!(value["generated_at"], "1970-01-01T00:00:00Z");
    }
}

//! Flat-table ingest.
//!
//! Every input is a headerless numeric table: `#` lines are comments, cells
//! are separated by the configured delimiter, `nan` marks a missing pick.
//! Schema violations (too few columns, unparsable cells, ragged rows) are
//! input errors (exit code 2).

use std::fs::File;
use std::path::Path;

use csv::StringRecord;

use crate::agescale::{ReferenceAgeScale, ReferenceSample};
use crate::domain::IsochroneAges;
use crate::error::AppError;
use crate::grid::RawRadar;

/// Radar picks inside a transect directory.
pub const RADAR_FILE: &str = "radar-data.txt";
/// Reference core dating, looked up in the transect directory then its parent.
pub const REFERENCE_FILE: &str = "reference-age.txt";
/// Isochrone calendar ages and their 1-sigma uncertainties.
pub const AGES_FILE: &str = "ages.txt";

/// Fixed leading columns of the radar table: lon, lat, x, y, distance, thickness.
const RADAR_FIXED_COLUMNS: usize = 6;

/// Column layout of the radar table.
#[derive(Debug, Clone, Copy)]
pub struct RadarLayout {
    pub has_bed_elevation: bool,
    /// `None` takes every column after the fixed ones.
    pub nbiso: Option<usize>,
    /// Added to thickness and depths, subtracted from bed elevation (m).
    pub firn_correction: f64,
}

/// Read a headerless numeric table into rows.
pub fn read_table(path: &Path, delimiter: char) -> Result<Vec<Vec<f64>>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter as u8)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| {
            AppError::input(format!("{}: CSV parse error: {e}", path.display()))
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(idx as u64 + 1);
        let row = parse_record(&record, delimiter.is_ascii_whitespace()).map_err(|e| {
            AppError::input(format!("{} line {line}: {e}", path.display()))
        })?;
        if !row.is_empty() {
            rows.push(row);
        }
    }
    log::debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

fn parse_record(record: &StringRecord, collapse_empty: bool) -> Result<Vec<f64>, String> {
    record
        .iter()
        .filter(|cell| !(collapse_empty && cell.is_empty()))
        .map(|cell| {
            cell.parse::<f64>()
                .map_err(|_| format!("'{cell}' is not a number"))
        })
        .collect()
}

fn require_columns(rows: &[Vec<f64>], needed: usize, path: &Path) -> Result<(), AppError> {
    for (i, row) in rows.iter().enumerate() {
        if row.len() < needed {
            return Err(AppError::input(format!(
                "{}: data row {} has {} columns, expected at least {needed}.",
                path.display(),
                i + 1,
                row.len()
            )));
        }
    }
    Ok(())
}

/// Read the radar table and apply the firn correction.
pub fn read_radar(path: &Path, layout: RadarLayout, delimiter: char) -> Result<RawRadar, AppError> {
    let rows = read_table(path, delimiter)?;
    let Some(first) = rows.first() else {
        return Err(AppError::data(format!("{} has no data rows.", path.display())));
    };

    let leading = RADAR_FIXED_COLUMNS + usize::from(layout.has_bed_elevation);
    let nbiso = match layout.nbiso {
        Some(n) => n,
        None => first.len().checked_sub(leading).ok_or_else(|| {
            AppError::input(format!(
                "{}: {} columns, expected at least {leading}.",
                path.display(),
                first.len()
            ))
        })?,
    };
    require_columns(&rows, leading + nbiso, path)?;

    let column = |c: usize| -> Vec<f64> { rows.iter().map(|r| r[c]).collect() };
    let firn = layout.firn_correction;
    let raw = RawRadar {
        lon: column(0),
        lat: column(1),
        x: column(2),
        y: column(3),
        distance: column(4),
        thickness: column(5).into_iter().map(|t| t + firn).collect(),
        bed_elevation: layout
            .has_bed_elevation
            .then(|| column(6).into_iter().map(|b| b - firn).collect()),
        isochrones: (0..nbiso)
            .map(|i| column(leading + i).into_iter().map(|d| d + firn).collect())
            .collect(),
    };
    log::info!(
        "Radar profile: {} samples, {nbiso} isochrones, {:.1}-{:.1} km",
        raw.len(),
        raw.distance.first().copied().unwrap_or(f64::NAN),
        raw.distance.last().copied().unwrap_or(f64::NAN)
    );
    Ok(raw)
}

/// Read the reference core table: depth, ice-equivalent depth, accumulation, age, sigma.
pub fn read_reference(path: &Path, delimiter: char) -> Result<ReferenceAgeScale, AppError> {
    let rows = read_table(path, delimiter)?;
    require_columns(&rows, 5, path)?;
    let samples: Vec<ReferenceSample> = rows
        .iter()
        .map(|r| ReferenceSample {
            depth: r[0],
            iedepth: r[1],
            accumulation: r[2],
            age: r[3],
            sigma_age: r[4],
        })
        .collect();
    ReferenceAgeScale::new(&samples)
        .map_err(|e| AppError::new(e.exit_code(), format!("{}: {}", path.display(), e.message())))
}

/// Read the isochrone ages table, keeping the first `nbiso` rows.
pub fn read_isochrone_ages(path: &Path, delimiter: char, nbiso: usize) -> Result<IsochroneAges, AppError> {
    let rows = read_table(path, delimiter)?;
    require_columns(&rows, 2, path)?;
    if rows.len() < nbiso {
        return Err(AppError::input(format!(
            "{} dates {} isochrones, the radar table has {nbiso}.",
            path.display(),
            rows.len()
        )));
    }
    let rows = &rows[..nbiso];
    IsochroneAges::new(
        rows.iter().map(|r| r[0]).collect(),
        rows.iter().map(|r| r[1]).collect(),
    )
}

/// Locate the reference table for a transect directory.
pub fn find_reference(transect_dir: &Path) -> Result<std::path::PathBuf, AppError> {
    let own = transect_dir.join(REFERENCE_FILE);
    if own.is_file() {
        return Ok(own);
    }
    if let Some(parent) = transect_dir.parent() {
        let shared = parent.join(REFERENCE_FILE);
        if shared.is_file() {
            return Ok(shared);
        }
    }
    Err(AppError::input(format!(
        "No {REFERENCE_FILE} in '{}' or its parent directory.",
        transect_dir.display()
    )))
}

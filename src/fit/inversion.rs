//! Inversion engine: per-location, joint, and evaluate-only runs.
//!
//! Per-location runs are embarrassingly parallel (rayon, one task per
//! column, each owning its solution). A numerical failure there only marks
//! that location as failed. The joint run is a single optimisation over the
//! whole transect, so any failure aborts it.

use nalgebra::DMatrix;
use rayon::prelude::*;

use super::lm::{LmConfig, LmResult, levenberg_marquardt};
use super::problem::{ColumnProblem, TransectProblem};
use crate::agescale::ReferenceAgeScale;
use crate::domain::{InversionMode, IsochroneAges, LocationStatus, Priors};
use crate::error::AppError;
use crate::grid::{ColumnGeometry, DepthGrid, Transect};
use crate::model::{ColumnParams, ColumnSolution, ForwardSettings};
use crate::sensitivity::{ColumnSigmas, column_sigmas};

/// Everything shared by every column of an inversion run.
#[derive(Debug, Clone)]
pub struct InversionInput<'a> {
    pub scale: &'a ReferenceAgeScale,
    pub ages: &'a IsochroneAges,
    pub priors: Priors,
    pub invert_g0: bool,
    pub calc_sigma: bool,
    pub settings: ForwardSettings,
    pub optimizer: LmConfig,
}

/// Optimizer outcome as reported in the result tables.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerReport {
    pub code: i32,
    pub message: &'static str,
    pub converged: bool,
    pub iterations: usize,
    pub cost: f64,
}

impl OptimizerReport {
    fn from_result(result: &LmResult) -> Self {
        Self {
            code: result.termination.code(),
            message: result.termination.message(),
            converged: result.termination.converged(),
            iterations: result.iterations,
            cost: result.cost,
        }
    }
}

/// Result of the inversion at one transect location.
#[derive(Debug, Clone)]
pub struct LocationFit {
    pub index: usize,
    pub status: LocationStatus,
    pub geometry: Option<ColumnGeometry>,
    pub solution: Option<ColumnSolution>,
    pub sigmas: ColumnSigmas,
    /// Model age at each observed isochrone depth.
    pub iso_modage: Vec<f64>,
    /// Weighted isochrone residuals (NaN where dropped).
    pub iso_residuals: Vec<f64>,
    pub optimizer: Option<OptimizerReport>,
}

impl LocationFit {
    fn without_solution(
        index: usize,
        status: LocationStatus,
        geometry: Option<ColumnGeometry>,
        n: usize,
        nbiso: usize,
    ) -> Self {
        Self {
            index,
            status,
            geometry,
            solution: None,
            sigmas: ColumnSigmas::undetermined(n),
            iso_modage: vec![f64::NAN; nbiso],
            iso_residuals: vec![f64::NAN; nbiso],
            optimizer: None,
        }
    }

    /// Number of isochrones that entered the fit.
    pub fn isochrones_used(&self) -> usize {
        self.iso_residuals.iter().filter(|r| r.is_finite()).count()
    }
}

/// Estimate the free parameters of every location of `transect`.
///
/// `initial` holds one parameter set per location (initial guess for the free
/// parameters, fixed values for the others).
pub fn invert_transect(
    transect: &Transect,
    grid: &DepthGrid,
    initial: &[ColumnParams],
    input: &InversionInput<'_>,
    mode: InversionMode,
) -> Result<Vec<LocationFit>, AppError> {
    if initial.len() != transect.len() {
        return Err(AppError::input(format!(
            "{} initial parameter sets for {} locations.",
            initial.len(),
            transect.len()
        )));
    }

    let geometries: Vec<Result<ColumnGeometry, String>> = transect
        .locations
        .iter()
        .map(|loc| {
            if !loc.thk.is_finite() {
                return Err("no thickness data".to_string());
            }
            ColumnGeometry::new(grid, loc.thk, input.scale).map_err(|e| e.message().to_string())
        })
        .collect();

    let active = geometries.iter().filter(|g| g.is_ok()).count();
    if active == 0 {
        return Err(AppError::data(
            "No transect location has usable thickness data.",
        ));
    }
    for (loc, geom) in transect.locations.iter().zip(geometries.iter()) {
        if let Err(reason) = geom {
            log::warn!("Skipping location at {:.3} km: {reason}", loc.distance);
        }
    }
    log::info!(
        "Inverting {active} of {} locations ({} mode, G0 {})",
        transect.len(),
        mode.label(),
        if input.invert_g0 { "inverted" } else { "fixed" }
    );

    let problems: Vec<Option<ColumnProblem<'_>>> = geometries
        .iter()
        .zip(transect.locations.iter())
        .zip(initial.iter())
        .map(|((geom, loc), base)| {
            geom.as_ref().ok().map(|geom| ColumnProblem {
                geom,
                base: *base,
                iso_depth: &loc.iso_depth,
                ages: input.ages,
                priors: input.priors,
                invert_g0: input.invert_g0,
                settings: input.settings,
                scale: input.scale,
            })
        })
        .collect();

    let fits = match mode {
        InversionMode::Evaluate => evaluate_all(&problems, &geometries, input),
        InversionMode::PerLocation => per_location(&problems, &geometries, input),
        InversionMode::Joint => joint(&problems, &geometries, input)?,
    };

    for (fit, loc) in fits.iter().zip(transect.locations.iter()) {
        report_location(fit, loc.distance);
    }
    Ok(fits)
}

fn evaluate_all(
    problems: &[Option<ColumnProblem<'_>>],
    geometries: &[Result<ColumnGeometry, String>],
    input: &InversionInput<'_>,
) -> Vec<LocationFit> {
    let n = depth_nodes(geometries);
    problems
        .par_iter()
        .enumerate()
        .map(|(j, problem)| {
            let Some(problem) = problem else {
                return skipped(j, &geometries[j], n, input.ages.len());
            };
            let x = problem.initial_guess();
            match finish_location(j, problem, x.as_slice(), None, None) {
                Ok(fit) => fit,
                Err(err) => failed(j, problem, err, n),
            }
        })
        .collect()
}

fn per_location(
    problems: &[Option<ColumnProblem<'_>>],
    geometries: &[Result<ColumnGeometry, String>],
    input: &InversionInput<'_>,
) -> Vec<LocationFit> {
    let n = depth_nodes(geometries);
    problems
        .par_iter()
        .enumerate()
        .map(|(j, problem)| {
            let Some(problem) = problem else {
                return skipped(j, &geometries[j], n, input.ages.len());
            };
            let outcome = levenberg_marquardt(problem, problem.initial_guess(), &input.optimizer)
                .and_then(|result| {
                    let covariance = input.calc_sigma.then_some(&result.covariance);
                    finish_location(
                        j,
                        problem,
                        result.params.as_slice(),
                        covariance,
                        Some(OptimizerReport::from_result(&result)),
                    )
                });
            match outcome {
                Ok(fit) => fit,
                Err(err) => failed(j, problem, err, n),
            }
        })
        .collect()
}

fn joint(
    problems: &[Option<ColumnProblem<'_>>],
    geometries: &[Result<ColumnGeometry, String>],
    input: &InversionInput<'_>,
) -> Result<Vec<LocationFit>, AppError> {
    let n = depth_nodes(geometries);
    let active: Vec<usize> = (0..problems.len()).filter(|&j| problems[j].is_some()).collect();
    let columns: Vec<ColumnProblem<'_>> = problems.iter().flatten().cloned().collect();
    let transect = TransectProblem::new(columns, input.invert_g0);

    let result = levenberg_marquardt(&transect, transect.initial_guess(), &input.optimizer)
        .map_err(|err| AppError::new(err.exit_code(), format!("Joint inversion failed: {err}")))?;
    let report = OptimizerReport::from_result(&result);
    log::info!(
        "Joint optimizer stopped after {} iterations: {} (code {}, cost {:.4})",
        report.iterations,
        report.message,
        report.code,
        report.cost
    );

    let finished = transect
        .columns
        .par_iter()
        .enumerate()
        .map(|(local, problem)| {
            let x = transect.local(&result.params, local);
            let covariance = input
                .calc_sigma
                .then(|| covariance_block(&transect, &result.covariance, local));
            finish_location(active[local], problem, &x, covariance.as_ref(), Some(report.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut finished = finished.into_iter();
    Ok((0..problems.len())
        .map(|j| {
            let fit = match problems[j] {
                Some(_) => finished.next(),
                None => None,
            };
            fit.unwrap_or_else(|| skipped(j, &geometries[j], n, input.ages.len()))
        })
        .collect())
}

/// Covariance of location `local`'s own parameters inside the joint covariance.
fn covariance_block(transect: &TransectProblem<'_>, cov: &DMatrix<f64>, local: usize) -> DMatrix<f64> {
    let k = transect.columns[local].num_free();
    DMatrix::from_fn(k, k, |a, b| {
        cov[(transect.param_index(local, a), transect.param_index(local, b))]
    })
}

/// Final forward solve at the optimum plus uncertainty.
fn finish_location(
    index: usize,
    problem: &ColumnProblem<'_>,
    x: &[f64],
    covariance: Option<&DMatrix<f64>>,
    optimizer: Option<OptimizerReport>,
) -> Result<LocationFit, AppError> {
    let (solution, modage) = problem.evaluate(x)?;
    let iso_residuals = problem.isochrone_residuals(&modage);
    let sigmas = match covariance {
        Some(cov) => column_sigmas(problem, x, cov)?,
        None => ColumnSigmas::undetermined(problem.geom.len()),
    };
    if let Some(cov) = covariance {
        for i in 0..x.len() {
            if cov[(i, i)].is_infinite() {
                log::warn!(
                    "Location {index}: parameter {} ({:.5}) is unconstrained by the data (infinite variance)",
                    parameter_name(i),
                    x[i]
                );
            }
        }
    }
    Ok(LocationFit {
        index,
        status: LocationStatus::Ok,
        geometry: Some(problem.geom.clone()),
        solution: Some(solution),
        sigmas,
        iso_modage: modage,
        iso_residuals,
        optimizer,
    })
}

fn parameter_name(i: usize) -> &'static str {
    match i {
        0 => "a",
        1 => "p'",
        _ => "G0",
    }
}

fn skipped(index: usize, geometry: &Result<ColumnGeometry, String>, n: usize, nbiso: usize) -> LocationFit {
    let reason = match geometry {
        Err(reason) => reason.clone(),
        Ok(_) => "not modelled".to_string(),
    };
    LocationFit::without_solution(index, LocationStatus::Skipped(reason), None, n, nbiso)
}

fn failed(index: usize, problem: &ColumnProblem<'_>, err: AppError, n: usize) -> LocationFit {
    log::warn!("Location {index}: forward model failed: {err}");
    LocationFit::without_solution(
        index,
        LocationStatus::Failed(err.message().to_string()),
        Some(problem.geom.clone()),
        n,
        problem.ages.len(),
    )
}

fn depth_nodes(geometries: &[Result<ColumnGeometry, String>]) -> usize {
    geometries
        .iter()
        .find_map(|g| g.as_ref().ok().map(|g| g.len()))
        .unwrap_or(0)
}

fn report_location(fit: &LocationFit, distance: f64) {
    let Some(solution) = &fit.solution else {
        return;
    };
    if !solution.settled {
        log::warn!(
            "Location at {distance:.3} km: basal regime still changing after the last thermal iteration ({} transitions, last solve {})",
            solution.transitions,
            solution.regime.label()
        );
    }
    if let Some(report) = &fit.optimizer {
        if !report.converged {
            log::warn!(
                "Location at {distance:.3} km: optimizer did not converge (code {}: {})",
                report.code,
                report.message
            );
        }
    }
    log::debug!(
        "Location at {distance:.3} km: a={:.5} p'={:.4} G0={:.4} m={:.6} ({}), {} isochrones used",
        solution.params.accumulation,
        solution.params.pprime,
        solution.params.g0,
        solution.melt,
        solution.regime.label(),
        fit.isochrones_used()
    );
}

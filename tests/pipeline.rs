use std::path::Path;

use isochrone_age::app::pipeline::{load_inputs, run_model, run_transect, write_synthetic};
use isochrone_age::data::{SyntheticSpec, SyntheticTransect, generate};
use isochrone_age::domain::{InversionMode, LocationStatus};
use isochrone_age::io::{PerLocation, ResultTables, RunConfig, read_table, write_results};
use isochrone_age::model::{BasalRegime, ColumnParams, ForwardSettings};

const TRUE_ACCUMULATION: f64 = 0.022;
const TRUE_PPRIME: f64 = 0.7;
const TRUE_G0: f64 = 0.07;

/// Uniform line: every resampled location sees exactly the generating column.
fn flat_spec(samples: usize) -> SyntheticSpec {
    SyntheticSpec {
        samples,
        thickness: 2600.0,
        thickness_amplitude: 0.0,
        accumulation_amplitude: 0.0,
        truth: ColumnParams {
            accumulation: TRUE_ACCUMULATION,
            pprime: TRUE_PPRIME,
            sliding: 0.0,
            g0: 0.05,
            surface_temperature: 218.0,
        },
        dzeta: 0.02,
        settings: ForwardSettings {
            thermal_iterations: 3,
            age_surf: 0.0,
        },
        ..SyntheticSpec::default()
    }
}

fn config_for(spec: &SyntheticSpec, mode: InversionMode) -> RunConfig {
    RunConfig {
        dzeta: spec.dzeta,
        thermal_iterations: spec.settings.thermal_iterations,
        age_surf: spec.settings.age_surf,
        accumulation: PerLocation::Scalar(0.026),
        pprime: PerLocation::Scalar(TRUE_PPRIME),
        pprime_prior: TRUE_PPRIME,
        pprime_sigma: 1.0,
        g0: PerLocation::Scalar(spec.truth.g0),
        surface_temperature: PerLocation::Scalar(spec.truth.surface_temperature),
        sliding: PerLocation::Scalar(spec.truth.sliding),
        mode,
        ..RunConfig::default()
    }
}

fn write_line(dir: &Path, line: &SyntheticTransect, config: &RunConfig) {
    write_synthetic(dir, line, config).unwrap();
}

#[test]
fn synthetic_transect_end_to_end() {
    let spec = SyntheticSpec {
        samples: 11,
        dzeta: 0.02,
        settings: ForwardSettings {
            thermal_iterations: 3,
            age_surf: 0.0,
        },
        ..SyntheticSpec::default()
    };
    let line = generate(&spec).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig {
        dzeta: spec.dzeta,
        thermal_iterations: 3,
        reference_distance: Some(5.0),
        ..RunConfig::default()
    };
    write_line(dir.path(), &line, &config);

    let loaded = RunConfig::load(dir.path(), None).unwrap();
    assert_eq!(loaded, config);

    let run = run_transect(dir.path(), &loaded).unwrap();
    // Auto extent: floor(0 + 2.99) .. floor(10 - 2).
    assert_eq!(run.transect.distances(), vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    assert_eq!(run.fits.len(), 7);
    assert_eq!(run.locations_ok(), 7);
    for (fit, basal) in run.fits.iter().zip(&run.derived.basal) {
        assert_eq!(fit.status, LocationStatus::Ok);
        assert_eq!(fit.isochrones_used(), spec.isochrone_ages.len());
        assert!(fit.optimizer.as_ref().is_some_and(|o| o.code > 0));
        assert!(basal.age.is_finite() && basal.age > 0.0);
        assert!(fit.sigmas.accumulation.is_finite());
    }
    assert!(run.derived.max_basal.is_some());
    assert!(run.derived.reference.is_some());

    let out = tempfile::tempdir().unwrap();
    let written = write_results(
        out.path(),
        &ResultTables {
            transect: &run.transect,
            fits: &run.fits,
            ages: &run.ages,
            derived: &run.derived,
            age_surf: loaded.age_surf,
        },
    )
    .unwrap();
    assert_eq!(written.len(), 7);

    let a = read_table(&out.path().join("a.txt"), '\t').unwrap();
    assert_eq!(a.len(), 7);
    assert_eq!(a[0].len(), 5 + spec.isochrone_ages.len());
    let ages = read_table(&out.path().join("age.txt"), '\t').unwrap();
    assert_eq!(ages.len(), 7 * 51);
}

#[test]
fn per_location_inversion_recovers_generating_parameters() {
    let spec = flat_spec(9);
    let line = generate(&spec).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&spec, InversionMode::PerLocation);
    write_line(dir.path(), &line, &config);

    let run = run_transect(dir.path(), &config).unwrap();
    assert!(!run.fits.is_empty());
    for fit in &run.fits {
        let solution = fit.solution.as_ref().unwrap();
        let a = solution.params.accumulation;
        assert!((a - TRUE_ACCUMULATION).abs() / TRUE_ACCUMULATION < 1e-5, "a = {a}");
        assert!((solution.params.pprime - TRUE_PPRIME).abs() < 1e-3);
        let optimizer = fit.optimizer.as_ref().unwrap();
        assert!(optimizer.cost < 1e-6, "cost = {}", optimizer.cost);
        assert!(fit.iso_residuals.iter().all(|r| r.abs() < 1e-3));
    }
}

#[test]
fn joint_inversion_recovers_generating_parameters() {
    let spec = flat_spec(8);
    let line = generate(&spec).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig {
        calc_sigma: false,
        ..config_for(&spec, InversionMode::Joint)
    };
    write_line(dir.path(), &line, &config);

    let run = run_transect(dir.path(), &config).unwrap();
    assert_eq!(run.fits.len(), 4);
    for fit in &run.fits {
        let solution = fit.solution.as_ref().unwrap();
        assert!((solution.params.accumulation - TRUE_ACCUMULATION).abs() / TRUE_ACCUMULATION < 1e-5);
        assert!((solution.params.pprime - TRUE_PPRIME).abs() < 1e-3);
        // No uncertainty requested: undetermined, not zero.
        assert!(fit.sigmas.accumulation.is_nan());
        assert!(fit.sigmas.age.iter().all(|s| s.is_nan()));
    }
}

/// Thick column with a high geothermal flux: the bed melts.
fn temperate_spec(samples: usize) -> SyntheticSpec {
    let mut spec = flat_spec(samples);
    spec.thickness = 3400.0;
    spec.truth.g0 = TRUE_G0;
    spec.settings.thermal_iterations = 5;
    spec
}

fn g0_config(spec: &SyntheticSpec, mode: InversionMode) -> RunConfig {
    RunConfig {
        accumulation: PerLocation::Scalar(0.024),
        g0: PerLocation::Scalar(0.065),
        g0_prior: TRUE_G0,
        g0_sigma: 0.025,
        invert_g0: true,
        ..config_for(spec, mode)
    }
}

#[test]
fn per_location_inversion_recovers_geothermal_flux() {
    let spec = temperate_spec(8);
    let line = generate(&spec).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = g0_config(&spec, InversionMode::PerLocation);
    write_line(dir.path(), &line, &config);

    let run = run_transect(dir.path(), &config).unwrap();
    assert_eq!(run.fits.len(), 4);
    for fit in &run.fits {
        let solution = fit.solution.as_ref().unwrap();
        assert_eq!(solution.regime, BasalRegime::Temperate);
        assert!(solution.melt > 0.0);
        let params = solution.params;
        assert!((params.accumulation - TRUE_ACCUMULATION).abs() / TRUE_ACCUMULATION < 1e-4);
        assert!((params.pprime - TRUE_PPRIME).abs() < 1e-3);
        assert!((params.g0 - TRUE_G0).abs() < 1e-4, "G0 = {}", params.g0);
        assert!(fit.optimizer.as_ref().is_some_and(|o| o.code > 0));
        // Constrained by the melt signal and the prior.
        assert!(fit.sigmas.g0.is_finite() && fit.sigmas.g0 > 0.0);
        assert!(fit.sigmas.g0 <= config.g0_sigma);
        assert!(fit.sigmas.melt.is_finite());
    }
}

#[test]
fn joint_inversion_recovers_geothermal_flux() {
    let spec = temperate_spec(8);
    let line = generate(&spec).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig {
        calc_sigma: false,
        ..g0_config(&spec, InversionMode::Joint)
    };
    write_line(dir.path(), &line, &config);

    let run = run_transect(dir.path(), &config).unwrap();
    assert_eq!(run.locations_ok(), 4);
    for fit in &run.fits {
        let params = fit.solution.as_ref().unwrap().params;
        assert!((params.accumulation - TRUE_ACCUMULATION).abs() / TRUE_ACCUMULATION < 1e-4);
        assert!((params.g0 - TRUE_G0).abs() < 1e-4, "G0 = {}", params.g0);
        assert!(fit.sigmas.g0.is_nan());
    }
}

#[test]
fn isochrone_below_the_bed_is_dropped_not_fatal() {
    let spec = flat_spec(8);
    let mut line = generate(&spec).unwrap();
    let last = line.raw.nbiso() - 1;
    line.raw.isochrones[last] = line.raw.thickness.iter().map(|t| t + 100.0).collect();

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&spec, InversionMode::PerLocation);
    write_line(dir.path(), &line, &config);

    let run = run_transect(dir.path(), &config).unwrap();
    for fit in &run.fits {
        assert!(fit.status.is_ok());
        assert!(fit.iso_modage[last].is_nan());
        assert!(fit.iso_residuals[last].is_nan());
        assert_eq!(fit.isochrones_used(), last);
        let a = fit.solution.as_ref().unwrap().params.accumulation;
        assert!((a - TRUE_ACCUMULATION).abs() / TRUE_ACCUMULATION < 1e-5);
    }
}

#[test]
fn location_without_isochrones_falls_back_to_the_prior() {
    let spec = flat_spec(8);
    let mut line = generate(&spec).unwrap();
    for iso in &mut line.raw.isochrones {
        iso.iter_mut().for_each(|d| *d = f64::NAN);
    }

    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig {
        pprime: PerLocation::Scalar(1.2),
        ..config_for(&spec, InversionMode::PerLocation)
    };
    write_line(dir.path(), &line, &config);

    let run = run_transect(dir.path(), &config).unwrap();
    for fit in &run.fits {
        assert!(fit.status.is_ok());
        assert_eq!(fit.isochrones_used(), 0);
        let solution = fit.solution.as_ref().unwrap();
        assert!((solution.params.pprime - TRUE_PPRIME).abs() < 1e-6);
        // Accumulation is unconstrained by the data.
        assert!((solution.params.accumulation - 0.026).abs() < 1e-12);
        assert!(fit.sigmas.accumulation.is_infinite());
        assert!((fit.sigmas.pprime - 1.0).abs() < 1e-6);
    }
}

#[test]
fn evaluate_mode_runs_forward_model_only() {
    let spec = flat_spec(8);
    let line = generate(&spec).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&spec, InversionMode::Evaluate);
    write_line(dir.path(), &line, &config);

    let inputs = load_inputs(dir.path(), &config).unwrap();
    let run = run_model("flat", &inputs, &config).unwrap();
    for fit in &run.fits {
        assert!(fit.optimizer.is_none());
        let solution = fit.solution.as_ref().unwrap();
        assert_eq!(solution.params.accumulation, 0.026);
        // Wrong accumulation: younger model ages than observed, finite residuals.
        assert!(fit.iso_residuals.iter().all(|r| r.is_finite() && *r > 0.0));
        assert!(fit.sigmas.melt.is_nan());
    }
}

#[test]
fn isochrone_ages_are_derived_at_the_reference_core() {
    let spec = flat_spec(8);
    let line = generate(&spec).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig {
        reference_distance: Some(4.0),
        derive_isochrone_ages: true,
        ..config_for(&spec, InversionMode::Evaluate)
    };
    write_line(dir.path(), &line, &config);

    let inputs = load_inputs(dir.path(), &config).unwrap();
    assert_eq!(inputs.ages.len(), spec.isochrone_ages.len());
    assert!(inputs.ages.age.windows(2).all(|w| w[1] > w[0]));

    let rewritten = read_table(&dir.path().join("ages.txt"), '\t').unwrap();
    assert_eq!(rewritten.len(), inputs.ages.len());
    assert_eq!(rewritten[0][0], inputs.ages.age[0]);
}

#[test]
fn malformed_radar_table_is_an_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let spec = flat_spec(8);
    let line = generate(&spec).unwrap();
    let config = config_for(&spec, InversionMode::Evaluate);
    write_line(dir.path(), &line, &config);
    std::fs::write(dir.path().join("radar-data.txt"), "1\t2\t3\n").unwrap();

    let err = run_transect(dir.path(), &config).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads the layered run configuration
//! - runs the inversion pipeline
//! - prints the summary and writes the result tables

use std::path::Path;

use clap::Parser;

use crate::cli::{Command, RunArgs, SynthArgs};
use crate::data::{SyntheticSpec, generate};
use crate::error::AppError;
use crate::io::{RunConfig, RunManifest, ResultTables, write_manifest, write_results};
use crate::report::{SummaryContext, format_run_summary};

pub mod pipeline;

/// Entry point for the `agemodel` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Synth(args) => handle_synth(args),
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let mut config = RunConfig::load(&args.dir, args.shared.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let run = pipeline::run_transect(&args.dir, &config)?;

    println!(
        "{}",
        format_run_summary(&SummaryContext {
            label: &run.label,
            mode: config.mode,
            generated: run.generated,
            transect: &run.transect,
            fits: &run.fits,
            derived: &run.derived,
        })
    );

    let out_dir = args.output.as_deref().unwrap_or(&args.dir);
    create_dir(out_dir)?;
    write_results(
        out_dir,
        &ResultTables {
            transect: &run.transect,
            fits: &run.fits,
            ages: &run.ages,
            derived: &run.derived,
            age_surf: config.age_surf,
        },
    )?;
    write_manifest(
        out_dir,
        &RunManifest {
            tool: "agemodel",
            version: env!("CARGO_PKG_VERSION"),
            generated_at: run.generated,
            label: &run.label,
            mode: config.mode,
            locations: run.transect.len(),
            locations_ok: run.locations_ok(),
            config: &config,
        },
    )?;

    Ok(())
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let spec = SyntheticSpec {
        seed: args.seed,
        samples: args.locations,
        spacing: args.spacing,
        depth_noise: args.noise,
        ..SyntheticSpec::default()
    };
    let line = generate(&spec)?;
    let config = RunConfig {
        dzeta: spec.dzeta,
        thermal_iterations: spec.settings.thermal_iterations,
        age_surf: spec.settings.age_surf,
        surface_temperature: spec.truth.surface_temperature.into(),
        sliding: spec.truth.sliding.into(),
        g0: spec.truth.g0.into(),
        ..RunConfig::default()
    };
    pipeline::write_synthetic(&args.dir, &line, &config)?;
    println!(
        "Wrote synthetic transect ({} samples, {} isochrones) to {}",
        line.raw.len(),
        line.ages.len(),
        args.dir.display()
    );
    Ok(())
}

/// Command-line flags win over both configuration files.
pub fn apply_overrides(config: &mut RunConfig, args: &RunArgs) {
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if args.no_sigma {
        config.calc_sigma = false;
    }
    if args.invert_g0 {
        config.invert_g0 = true;
    }
}

fn create_dir(dir: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", dir.display())))
}

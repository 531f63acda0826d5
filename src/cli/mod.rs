//! Command-line parsing for the age model.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! model and inversion code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::InversionMode;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "agemodel",
    version,
    about = "Age-depth inversion of ice-sheet radar isochrones"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the flow/thermal model to the isochrones of one transect directory.
    Run(RunArgs),
    /// Write a synthetic transect directory generated by the forward model.
    Synth(SynthArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// Transect directory (radar-data.txt, ages.txt, optional parameters.json).
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Configuration shared by every transect, merged below the transect's own file.
    #[arg(long, value_name = "JSON")]
    pub shared: Option<PathBuf>,

    /// Override the estimation mode.
    #[arg(long, value_enum)]
    pub mode: Option<InversionMode>,

    /// Skip the uncertainty propagation.
    #[arg(long)]
    pub no_sigma: bool,

    /// Invert the geothermal flux as a third free parameter.
    #[arg(long)]
    pub invert_g0: bool,

    /// Write result tables here instead of into the transect directory.
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct SynthArgs {
    /// Directory to create (or overwrite files in).
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Random seed for the pick noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Standard deviation of the noise added to picked depths (m).
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Number of raw radar samples along the line.
    #[arg(long, default_value_t = 31)]
    pub locations: usize,

    /// Along-track spacing of the raw samples (km).
    #[arg(long, default_value_t = 1.0)]
    pub spacing: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_overrides() {
        let cli = Cli::parse_from([
            "agemodel",
            "run",
            "lines/LDC",
            "--mode",
            "per-location",
            "--no-sigma",
            "--shared",
            "all.json",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.mode, Some(InversionMode::PerLocation));
        assert!(args.no_sigma);
        assert!(!args.invert_g0);
        assert_eq!(args.shared, Some(PathBuf::from("all.json")));
    }

    #[test]
    fn synth_defaults() {
        let cli = Cli::parse_from(["agemodel", "synth", "out"]);
        let Command::Synth(args) = cli.command else {
            panic!("expected synth");
        };
        assert_eq!(args.seed, 42);
        assert_eq!(args.locations, 31);
        assert_eq!(args.noise, 0.0);
    }
}

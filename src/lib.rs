//! `isochrone-age` library crate.
//!
//! The binary (`agemodel`) is a thin wrapper around this library so that:
//!
//! - the forward model and the inversion are testable without spawning processes
//! - the pipeline is reusable from other front-ends
//!
//! Layout, leaf-first: `math` (interpolation, resampling, linear solves),
//! `grid` and `agescale` (geometry and the reference clock), `model` (flow and
//! heat transfer), `fit` (least squares), `sensitivity` (uncertainty), then
//! `io`, `report`, `data` and `app`.

pub mod agescale;
pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod grid;
pub mod io;
pub mod math;
pub mod model;
pub mod report;
pub mod sensitivity;

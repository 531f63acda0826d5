//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the estimation mode (`InversionMode`)
//! - dated isochrone ages (`IsochroneAges`) and priors (`Priors`)
//! - per-location outcome (`LocationStatus`)

pub mod types;

pub use types::*;

//! Input/output helpers.
//!
//! - JSON run configuration (`config`)
//! - flat-table ingest + validation (`ingest`)
//! - result tables and run manifest (`export`)

pub mod config;
pub mod export;
pub mod ingest;

pub use config::*;
pub use export::*;
pub use ingest::*;

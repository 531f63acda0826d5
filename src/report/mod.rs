//! Reporting: derived transect quantities and the run summary.

pub mod derived;
pub mod format;

pub use derived::*;
pub use format::*;

//! Uncertainty of derived quantities (age, log-age, accumulation, melt, flux).

pub mod propagate;

pub use propagate::*;

//! Parameter estimation.
//!
//! Responsibilities:
//!
//! - damped least squares with NaN-tolerant residuals (`lm`)
//! - residual layouts for one column and for the whole transect (`problem`)
//! - per-location / joint / evaluate-only orchestration (`inversion`)

pub mod inversion;
pub mod lm;
pub mod problem;

pub use inversion::*;
pub use lm::{LeastSquaresProblem, LmConfig, LmResult, Termination, levenberg_marquardt};
pub use problem::*;

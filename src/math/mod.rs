//! Numerical building blocks: interpolation, interval resampling, linear solves.

pub mod interp;
pub mod linalg;
pub mod resample;

pub use interp::*;
pub use linalg::*;
pub use resample::*;

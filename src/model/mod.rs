//! Forward model: ice physics, steady flow, steady heat transfer, age.

pub mod column;
pub mod mechanics;
pub mod physics;
pub mod thermal;

pub use column::*;
pub use mechanics::*;
pub use thermal::*;

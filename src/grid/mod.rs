//! Grids: the along-track distance grid and the vertical `zeta` grid.

pub mod depth;
pub mod transect;

pub use depth::*;
pub use transect::*;

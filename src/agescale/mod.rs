//! Reference age scale: steady age and calendar-age lookups.

pub mod reference;

pub use reference::*;

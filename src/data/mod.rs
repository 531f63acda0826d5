//! Synthetic inputs for demonstrations and end-to-end tests.

pub mod synthetic;

pub use synthetic::*;

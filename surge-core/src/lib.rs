//! Shared types for the surge load generator: run configuration, charsets,
//! validation errors and run statistics.
mod charset;
mod config;
mod constants;
mod data;
mod error;
mod stats;

pub use charset::*;
pub use config::*;
pub use constants::*;
pub use data::*;
pub use error::*;
pub use stats::*;

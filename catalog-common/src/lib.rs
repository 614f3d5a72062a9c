//! Configuration shared by the catalog fusion binary and library:
//! config file resolution, TOML loading with defaults, validation and atomic writes.

pub mod config;
pub mod error;

pub use error::{Error, Result};

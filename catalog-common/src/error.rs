//! Errors raised while loading or writing catalog configuration

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File exists but is not valid TOML for [`crate::config::TomlConfig`]
    #[error("Cannot parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A value is outside its allowed range, or serialization failed
    #[error("Configuration error: {0}")]
    Config(String),
}

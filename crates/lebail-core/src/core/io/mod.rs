//! Text-file surfaces for measured patterns, phase cards and calculated profiles.

pub mod pattern;
pub mod phases;
pub mod traits;

use crate::core::models::pattern::PatternError;
use crate::core::models::phase::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Parse error in '{path}' at line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
    #[error("Invalid pattern in '{path}': {source}")]
    Pattern { path: String, source: PatternError },
    #[error("Invalid phase definition in '{path}': {source}")]
    Model { path: String, source: ModelError },
}

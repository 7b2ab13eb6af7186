use super::config::ConfigError;
use crate::core::models::pattern::PatternError;
use crate::core::models::phase::ModelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid angular range: minimum {min} must be below maximum {max}")]
    InvalidRange { min: f64, max: f64 },

    #[error(
        "Experimental and calculated arrays disagree in length (expected {expected}, found {found})"
    )]
    DimensionMismatch { expected: usize, found: usize },

    #[error("No phases attached to the refinement")]
    NoPhases,

    #[error("Active pattern window contains no samples")]
    EmptyPattern,

    #[error("A refinement session is already running on this engine")]
    SessionActive,

    #[error("Phase not found in session")]
    PhaseNotFound,

    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Pattern error: {0}")]
    Pattern(PatternError),

    #[error("Model error: {source}")]
    Model {
        #[from]
        source: ModelError,
    },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl From<PatternError> for EngineError {
    fn from(err: PatternError) -> Self {
        match err {
            PatternError::InvalidRange { min, max } => EngineError::InvalidRange { min, max },
            other => EngineError::Pattern(other),
        }
    }
}

//! Error types for the evaluation engine

use thiserror::Error;

/// Result type for evaluation operations
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors that can occur while evaluating work items
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Image not available: {0}")]
    ImageMissing(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Resource admission failed: {0}")]
    Admission(String),

    #[error("No log parser registered for: {0}")]
    ParserNotFound(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Judge error: {0}")]
    Judge(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EvalError {
    /// Failures of the host or container environment rather than of the item.
    pub fn is_infra(&self) -> bool {
        matches!(
            self,
            EvalError::ImageMissing(_)
                | EvalError::Container(_)
                | EvalError::Admission(_)
                | EvalError::ParserNotFound(_)
        )
    }
}

impl From<std::io::Error> for EvalError {
    fn from(err: std::io::Error) -> Self {
        EvalError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::Serialization(err.to_string())
    }
}

impl From<bollard::errors::Error> for EvalError {
    fn from(err: bollard::errors::Error) -> Self {
        EvalError::Container(err.to_string())
    }
}

impl From<toml::de::Error> for EvalError {
    fn from(err: toml::de::Error) -> Self {
        EvalError::Config(err.to_string())
    }
}

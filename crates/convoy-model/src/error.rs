//! Model error types

use thiserror::Error;

/// Errors raised by model-level validation and encoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid pattern: {0}")]
    Pattern(String),
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        ModelError::Serialization(e.to_string())
    }
}

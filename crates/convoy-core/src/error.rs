//! Core error types for convoy-core

use thiserror::Error;

use convoy_provider::ProviderError;

use crate::expr::ExprError;

/// Errors that can occur in planning and orchestration
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Target not found in registry
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// Target already exists in registry
    #[error("target already exists: {0}")]
    TargetAlreadyExists(String),

    /// Malformed constraint
    #[error("constraint error: {0}")]
    Constraint(String),

    /// Expression failed to parse or evaluate
    #[error("expression error: {0}")]
    Expression(#[from] ExprError),

    /// Assignment could not be computed
    #[error("planning error: {0}")]
    Planning(String),

    /// Provider operation failed
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// No provider bound for the requested role
    #[error("target {target} has no binding for role '{role}'")]
    NoBinding {
        /// Target name
        target: String,
        /// Requested role
        role: String,
    },

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl CoreError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Provider(e) => e.is_retryable(),
            CoreError::ActorError(_) => true,
            _ => false,
        }
    }
}

//! Error types for convoy-provider

use thiserror::Error;

use convoy_model::{ModelError, ResultMap, State};

/// Errors that can occur in provider operations
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Bad or missing provider configuration, fatal at init
    #[error("bad config: {0}")]
    Config(String),

    /// A component failed the provider's validation rule
    #[error("validation failed: {0}")]
    Validation(String),

    /// Update or delete of one component failed against the target
    #[error("{component}: {message}")]
    Operation {
        /// Component that failed
        component: String,
        /// Recorded status
        state: State,
        /// Failure detail
        message: String,
    },

    /// Publishing or subscribing on the bus failed
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply arrived before the timeout
    #[error("didn't get response to {operation} call over MQTT")]
    NoResponse {
        /// Operation name, e.g. `Get()`
        operation: String,
    },

    /// The caller cancelled the call
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The remote side answered with a failure state
    #[error("remote error ({state}): {message}")]
    Remote {
        /// Remote state
        state: State,
        /// Remote message
        message: String,
    },

    /// No constructor is registered for the provider type
    #[error("unknown provider type: {0}")]
    UnknownProviderType(String),

    /// Provider used before a successful init
    #[error("provider not initialized")]
    NotInitialized,

    /// Encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// HTTP request failed
    #[error("http error: {0}")]
    Http(String),

    /// Script execution failed
    #[error("execution error: {0}")]
    Exec(String),

    /// File system error
    #[error("I/O error: {0}")]
    Io(String),
}

impl ProviderError {
    /// Operation failure for one component
    pub fn operation(component: impl Into<String>, state: State, message: impl Into<String>) -> Self {
        ProviderError::Operation {
            component: component.into(),
            state,
            message: message.into(),
        }
    }

    /// The result state matching this error
    #[must_use]
    pub fn state(&self) -> State {
        match self {
            ProviderError::Config(_) | ProviderError::UnknownProviderType(_) => State::BadConfig,
            ProviderError::Validation(_) => State::ValidateFailed,
            ProviderError::Operation { state, .. } | ProviderError::Remote { state, .. } => *state,
            ProviderError::NoResponse { .. } | ProviderError::DeadlineExceeded => State::Timeout,
            ProviderError::Serialization(_) => State::BadRequest,
            ProviderError::Transport(_)
            | ProviderError::Cancelled
            | ProviderError::NotInitialized
            | ProviderError::Http(_)
            | ProviderError::Exec(_)
            | ProviderError::Io(_) => State::InternalError,
        }
    }

    /// Check if error is retryable
    ///
    /// The provider layer never retries itself, this only informs callers.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_)
                | ProviderError::NoResponse { .. }
                | ProviderError::DeadlineExceeded
                | ProviderError::Http(_)
        )
    }

    /// Check if error is a configuration error
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ProviderError::Config(_) | ProviderError::UnknownProviderType(_)
        )
    }
}

impl From<ModelError> for ProviderError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Validation(msg) => ProviderError::Validation(msg),
            ModelError::Serialization(msg) | ModelError::Pattern(msg) => {
                ProviderError::Serialization(msg)
            }
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e.to_string())
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        ProviderError::Io(e.to_string())
    }
}

impl From<convoy_exec::ExecError> for ProviderError {
    fn from(e: convoy_exec::ExecError) -> Self {
        ProviderError::Exec(e.to_string())
    }
}

/// A failed apply: the partial result map plus the error that stopped it
///
/// Callers must not assume `results` covers more than the components that
/// were attempted or marked.
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct ApplyFailure {
    pub results: ResultMap,
    pub error: ProviderError,
}

impl ApplyFailure {
    #[must_use]
    pub fn new(results: ResultMap, error: ProviderError) -> Self {
        Self { results, error }
    }
}

impl From<ProviderError> for ApplyFailure {
    fn from(error: ProviderError) -> Self {
        Self {
            results: ResultMap::new(),
            error,
        }
    }
}

//! Per-component reconciliation outcomes

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome state of a component operation or a remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[serde(rename = "OK")]
    Ok,
    Accepted,
    Untouched,
    Updated,
    UpdateFailed,
    Deleted,
    DeleteFailed,
    ValidateFailed,
    BadRequest,
    BadConfig,
    NotFound,
    InternalError,
    Timeout,
}

impl State {
    /// Whether the state represents a failure
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            State::UpdateFailed
                | State::DeleteFailed
                | State::ValidateFailed
                | State::BadRequest
                | State::BadConfig
                | State::NotFound
                | State::InternalError
                | State::Timeout
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            State::Ok => "OK",
            State::Accepted => "Accepted",
            State::Untouched => "Untouched",
            State::Updated => "Updated",
            State::UpdateFailed => "UpdateFailed",
            State::Deleted => "Deleted",
            State::DeleteFailed => "DeleteFailed",
            State::ValidateFailed => "ValidateFailed",
            State::BadRequest => "BadRequest",
            State::BadConfig => "BadConfig",
            State::NotFound => "NotFound",
            State::InternalError => "InternalError",
            State::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status and message recorded for one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentResultSpec {
    pub status: State,
    #[serde(default)]
    pub message: String,
}

impl ComponentResultSpec {
    pub fn new(status: State, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn ok() -> Self {
        Self::new(State::Ok, "")
    }
}

/// Component name to outcome
pub type ResultMap = BTreeMap<String, ComponentResultSpec>;

//! Target actor states

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a `TargetActor` is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    Idle,
    /// Reading current state from providers
    Reading,
    /// Applying a step
    Applying,
    /// Last operation failed, cleared by the next successful one
    Failed,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetState::Idle => "idle",
            TargetState::Reading => "reading",
            TargetState::Applying => "applying",
            TargetState::Failed => "failed",
        };
        f.write_str(s)
    }
}

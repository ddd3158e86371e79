//! Reconciliation settings shared by the actors

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Binding role used for components whose type has no binding of its own
pub const DEFAULT_ROLE: &str = "instance";

/// Settings applied to every target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Role to fall back to when a component type has no binding
    #[serde(default = "default_role")]
    pub default_role: String,
    /// Upper bound for a single provider call, none by default
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
    /// Event broadcast channel capacity
    #[serde(default = "default_capacity")]
    pub event_channel_capacity: usize,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

fn default_capacity() -> usize {
    1024
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            default_role: default_role(),
            call_timeout_secs: None,
            event_channel_capacity: default_capacity(),
        }
    }
}

impl ReconcileConfig {
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

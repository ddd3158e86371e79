//! Deployment event types

use serde::{Deserialize, Serialize};

use crate::result::State;

/// Events emitted while targets are reconciled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeploymentEvent {
    TargetStateChanged {
        target: String,
        from: String,
        to: String,
    },
    ComponentApplied {
        target: String,
        component: String,
        state: State,
    },
    StepCompleted {
        target: String,
        success: bool,
        components: usize,
    },
    StepFailed {
        target: String,
        error: String,
    },
    DeploymentCompleted {
        instance: String,
        success: bool,
    },
}

impl DeploymentEvent {
    /// Name of the target the event refers to, if any
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            DeploymentEvent::TargetStateChanged { target, .. }
            | DeploymentEvent::ComponentApplied { target, .. }
            | DeploymentEvent::StepCompleted { target, .. }
            | DeploymentEvent::StepFailed { target, .. } => Some(target),
            DeploymentEvent::DeploymentCompleted { .. } => None,
        }
    }
}

//! Message types for actor communication
//!
//! Message handlers are implemented in their respective actor modules.

use std::collections::BTreeMap;

use kameo_macros::Reply;
use serde::Serialize;

use convoy_model::{
    ComponentSpec, DeploymentSpec, DeploymentStep, InstanceSpec, ResultMap, SolutionSpec,
    TargetSpec,
};

use crate::state::TargetState;

// ============================================================================
// TargetActor Messages
// ============================================================================

/// Read the current state of `components` from the target's providers
#[derive(Debug)]
pub struct GetCurrent {
    pub deployment: DeploymentSpec,
    pub components: Vec<ComponentSpec>,
}

/// Apply a prepared step through the provider bound to its role
#[derive(Debug)]
pub struct ApplyStep {
    pub deployment: DeploymentSpec,
    /// An empty role means the default role
    pub step: DeploymentStep,
    pub dry_run: bool,
}

/// Outcome of one step
///
/// Provider failures land in `error` together with the partial results.
#[derive(Debug, Clone, Reply)]
pub struct StepResult {
    pub target: String,
    pub role: String,
    pub results: ResultMap,
    pub error: Option<String>,
}

impl StepResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Bring the target in line with its assignment in `deployment`
#[derive(Debug)]
pub struct Reconcile {
    pub deployment: DeploymentSpec,
    pub dry_run: bool,
}

/// Get full target status
#[derive(Debug)]
pub struct GetStatus;

/// Target status response
#[derive(Debug, Clone, Reply, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    pub name: String,
    pub state: TargetState,
    /// Role to names of components last deployed through it
    pub deployed: BTreeMap<String, Vec<String>>,
    pub reconcile_count: u64,
    /// Error message of the last failed operation
    pub error: Option<String>,
}

// ============================================================================
// DeploymentActor Messages
// ============================================================================

/// Register a target and build its providers
#[derive(Debug)]
pub struct RegisterTarget {
    pub spec: TargetSpec,
}

/// Stop and forget a target
#[derive(Debug)]
pub struct UnregisterTarget {
    pub name: String,
}

/// Get status of a specific target
#[derive(Debug)]
pub struct GetTargetStatus {
    pub name: String,
}

/// List all registered targets
#[derive(Debug)]
pub struct ListTargets;

/// Reconcile a prepared deployment on every target it names
///
/// Missing assignments are computed from the solution first.
#[derive(Debug)]
pub struct Deploy {
    pub deployment: DeploymentSpec,
    pub dry_run: bool,
}

/// Plan `solution` for `instance` over the registered targets and deploy it
#[derive(Debug)]
pub struct DeploySolution {
    pub solution: SolutionSpec,
    pub instance: InstanceSpec,
    pub dry_run: bool,
}

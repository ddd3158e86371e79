//! convoy-model: Shared data model
//!
//! Contains the solution, target, instance and deployment specs, reconciliation
//! steps and results, validation rules and the message bus envelopes used across
//! the planner, the providers and the remote agent.

pub mod bus;
pub mod component;
pub mod constraint;
pub mod deployment;
pub mod error;
pub mod events;
pub mod result;
pub mod solution;
pub mod target;
pub mod validation;
pub mod value;

pub use bus::{
    ApplyErrorBody, ApplyPayload, BusRequest, BusResponse, CallContextKind, ComparePayload,
    GetPayload, RemovePayload,
};
pub use component::{ComponentSpec, RouteSpec};
pub use constraint::ConstraintSpec;
pub use deployment::{ComponentAction, ComponentStep, DeploymentPlan, DeploymentSpec, DeploymentStep};
pub use error::ModelError;
pub use events::DeploymentEvent;
pub use result::{ComponentResultSpec, ResultMap, State};
pub use solution::{InstanceSpec, SolutionSpec, TargetSelector};
pub use target::{BindingSpec, TargetSpec, TopologySpec};
pub use validation::{PropertyDesc, ValidationRule};
pub use value::Value;

//! convoy-core: Placement logic and deployment orchestration
//!
//! Property matching, constraint scoring, the expression language, property
//! schemas and the component assignment planner, plus the kameo actors that
//! reconcile targets through their providers.

pub mod actor;
pub mod config;
pub mod constraint;
pub mod error;
pub mod expr;
pub mod matcher;
pub mod message;
pub mod planner;
pub mod reconcile;
pub mod schema;
pub mod state;

pub use actor::deployment::{
    DeploymentActor, DeploymentActorArgs, ProviderFactory, RegistryProviderFactory,
};
pub use actor::target::{TargetActor, TargetActorArgs};
pub use config::{DEFAULT_ROLE, ReconcileConfig};
pub use constraint::{
    evaluate_constraint, evaluate_constraints, evaluate_target_compatibility, rank_targets,
};
pub use error::CoreError;
pub use expr::{EvalContext, Evaluator, ExprError, FunctionRegistry};
pub use matcher::match_string;
pub use message::{
    ApplyStep, Deploy, DeploySolution, GetCurrent, GetStatus, GetTargetStatus, ListTargets,
    Reconcile, RegisterTarget, StepResult, TargetStatus, UnregisterTarget,
};
pub use planner::{assign_components, build_deployment, components_for_target, parse_assignment};
pub use reconcile::{DeploymentSummary, ResultCollector, TargetOutcome, plan_step};
pub use schema::{Rule, RuleResult, Schema, SchemaResult};
pub use state::TargetState;

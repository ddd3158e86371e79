//! Target provider traits

use std::collections::HashMap;

use async_trait::async_trait;

use convoy_model::{
    ComponentSpec, ComponentStep, DeploymentSpec, DeploymentStep, ResultMap, ValidationRule,
};

use crate::context::CallContext;
use crate::error::{ApplyFailure, ProviderError};

/// The contract every target integration implements
///
/// Instances are independently usable and carry no process-wide state.
#[async_trait]
pub trait TargetProvider: Send + Sync {
    /// Registry type tag, e.g. `providers.target.mock`
    fn provider_type(&self) -> &'static str;

    /// Initialize from a structured configuration
    async fn init(&self, config: serde_json::Value) -> Result<(), ProviderError>;

    /// Initialize from the flat map used by topology bindings
    async fn init_with_map(&self, properties: &HashMap<String, String>)
    -> Result<(), ProviderError>;

    /// What components this provider accepts
    fn validation_rule(&self) -> ValidationRule;

    /// Read current state of the referenced components
    ///
    /// Returns an empty list when the target has nothing to report.
    async fn get(
        &self,
        ctx: &CallContext,
        deployment: &DeploymentSpec,
        references: &[ComponentStep],
    ) -> Result<Vec<ComponentSpec>, ProviderError>;

    /// Apply a step: validate, then updates, then deletes
    ///
    /// Returns `Ok(None)` on a successful dry run. Stops at the first failing
    /// component and reports the partial result map with the error.
    async fn apply(
        &self,
        ctx: &CallContext,
        deployment: &DeploymentSpec,
        step: &DeploymentStep,
        dry_run: bool,
    ) -> Result<Option<ResultMap>, ApplyFailure>;

    /// Remove components outside of the step model
    async fn remove(
        &self,
        ctx: &CallContext,
        deployment: &DeploymentSpec,
        components: &[ComponentSpec],
    ) -> Result<(), ProviderError> {
        let step = DeploymentStep::new(
            deployment.active_target.clone(),
            components
                .iter()
                .cloned()
                .map(ComponentStep::delete)
                .collect(),
        );
        self.apply(ctx, deployment, &step, false)
            .await
            .map(|_| ())
            .map_err(|f| f.error)
    }
}

/// Set-difference comparison for callers that diff outside the step model
#[async_trait]
pub trait LegacyComparer: Send + Sync {
    /// Whether `desired` is not yet covered by `current`
    async fn needs_update(
        &self,
        ctx: &CallContext,
        desired: &[ComponentSpec],
        current: &[ComponentSpec],
    ) -> Result<bool, ProviderError>;

    /// Whether any `desired` component is still present in `current`
    async fn needs_remove(
        &self,
        ctx: &CallContext,
        desired: &[ComponentSpec],
        current: &[ComponentSpec],
    ) -> Result<bool, ProviderError>;
}

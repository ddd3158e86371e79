//! In-memory target provider for tests and demos
//!
//! State lives in an explicitly injected [`MockStore`]. Providers share state
//! only when the caller hands them clones of the same store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use convoy_model::component::{needs_remove, needs_update};
use convoy_model::{
    ComponentAction, ComponentResultSpec, ComponentSpec, ComponentStep, DeploymentSpec,
    DeploymentStep, PropertyDesc, ResultMap, State, ValidationRule,
};

use crate::apply::{fail_component, validate_step};
use crate::config::{MapConfig, from_json};
use crate::context::CallContext;
use crate::error::{ApplyFailure, ProviderError};
use crate::traits::{LegacyComparer, TargetProvider};

pub const PROVIDER_TYPE: &str = "providers.target.mock";

#[derive(Default)]
struct StoreState {
    components: HashMap<String, Vec<ComponentSpec>>,
    failing: HashSet<String>,
}

/// Component cache keyed by provider id
#[derive(Clone, Default)]
pub struct MockStore {
    inner: Arc<Mutex<StoreState>>,
}

impl MockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Components currently stored under `id`
    #[must_use]
    pub fn components(&self, id: &str) -> Vec<ComponentSpec> {
        self.lock().components.get(id).cloned().unwrap_or_default()
    }

    /// Make every operation on the named component fail
    pub fn fail_component(&self, name: impl Into<String>) {
        self.lock().failing.insert(name.into());
    }

    fn is_failing(&self, name: &str) -> bool {
        self.lock().failing.contains(name)
    }

    fn upsert(&self, id: &str, component: &ComponentSpec) {
        let mut state = self.lock();
        let list = state.components.entry(id.to_string()).or_default();
        match list.iter_mut().find(|c| c.name == component.name) {
            Some(existing) => *existing = component.clone(),
            None => list.push(component.clone()),
        }
    }

    fn remove(&self, id: &str, name: &str) {
        if let Some(list) = self.lock().components.get_mut(id) {
            list.retain(|c| c.name != name);
        }
    }
}

/// Mock provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {
    #[serde(default)]
    pub id: String,
}

impl MockConfig {
    pub fn from_map(properties: &HashMap<String, String>) -> Result<Self, ProviderError> {
        let cfg = MapConfig::new("mock", properties);
        Ok(Self {
            id: cfg.string_or("id", ""),
        })
    }
}

/// In-memory provider
pub struct MockTargetProvider {
    config: Mutex<MockConfig>,
    store: MockStore,
}

impl MockTargetProvider {
    /// Provider backed by `store`
    #[must_use]
    pub fn new(store: MockStore) -> Self {
        Self {
            config: Mutex::new(MockConfig::default()),
            store,
        }
    }

    /// The store this provider writes to
    #[must_use]
    pub fn store(&self) -> &MockStore {
        &self.store
    }

    fn id(&self) -> String {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .id
            .clone()
    }

    fn set_config(&self, config: MockConfig) {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

impl Default for MockTargetProvider {
    fn default() -> Self {
        Self::new(MockStore::new())
    }
}

#[async_trait]
impl TargetProvider for MockTargetProvider {
    fn provider_type(&self) -> &'static str {
        PROVIDER_TYPE
    }

    async fn init(&self, config: serde_json::Value) -> Result<(), ProviderError> {
        let config: MockConfig = from_json("mock", config)?;
        info!(id = %config.id, "mock provider initialized");
        self.set_config(config);
        Ok(())
    }

    async fn init_with_map(
        &self,
        properties: &HashMap<String, String>,
    ) -> Result<(), ProviderError> {
        let config = MockConfig::from_map(properties)?;
        self.set_config(config);
        Ok(())
    }

    fn validation_rule(&self) -> ValidationRule {
        // a changed or dropped property counts
        ValidationRule {
            change_detection_properties: vec![PropertyDesc::new("*")],
            ..ValidationRule::default()
        }
    }

    #[instrument(skip(self, ctx, deployment, references), fields(instance = %deployment.instance.name))]
    async fn get(
        &self,
        ctx: &CallContext,
        deployment: &DeploymentSpec,
        references: &[ComponentStep],
    ) -> Result<Vec<ComponentSpec>, ProviderError> {
        ctx.check()?;
        let stored = self.store.components(&self.id());
        if references.is_empty() {
            return Ok(stored);
        }
        let wanted: HashSet<&str> = references
            .iter()
            .map(|r| r.component.name.as_str())
            .collect();
        Ok(stored
            .into_iter()
            .filter(|c| wanted.contains(c.name.as_str()))
            .collect())
    }

    #[instrument(skip(self, ctx, _deployment, step), fields(target = %step.target, count = step.components.len()))]
    async fn apply(
        &self,
        ctx: &CallContext,
        _deployment: &DeploymentSpec,
        step: &DeploymentStep,
        dry_run: bool,
    ) -> Result<Option<ResultMap>, ApplyFailure> {
        validate_step(&self.validation_rule(), step)?;
        if dry_run {
            debug!("dry run, skipping apply");
            return Ok(None);
        }

        let id = self.id();
        let mut results = step.prepare_result_map();
        for action in [ComponentAction::Update, ComponentAction::Delete] {
            let (done, failed) = match action {
                ComponentAction::Update => (State::Updated, State::UpdateFailed),
                ComponentAction::Delete => (State::Deleted, State::DeleteFailed),
            };
            for item in step.components.iter().filter(|c| c.action == action) {
                if let Err(e) = ctx.check() {
                    return Err(ApplyFailure::new(results, e));
                }
                let name = &item.component.name;
                if self.store.is_failing(name) {
                    return Err(fail_component(results, name, failed, "injected failure"));
                }
                match action {
                    ComponentAction::Update => self.store.upsert(&id, &item.component),
                    ComponentAction::Delete => self.store.remove(&id, name),
                }
                results.insert(name.clone(), ComponentResultSpec::new(done, ""));
            }
        }
        Ok(Some(results))
    }
}

#[async_trait]
impl LegacyComparer for MockTargetProvider {
    async fn needs_update(
        &self,
        _ctx: &CallContext,
        desired: &[ComponentSpec],
        current: &[ComponentSpec],
    ) -> Result<bool, ProviderError> {
        Ok(needs_update(desired, current))
    }

    async fn needs_remove(
        &self,
        _ctx: &CallContext,
        desired: &[ComponentSpec],
        current: &[ComponentSpec],
    ) -> Result<bool, ProviderError> {
        Ok(needs_remove(desired, current))
    }
}

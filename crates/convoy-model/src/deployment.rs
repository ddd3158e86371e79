//! Deployments, steps and plans

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::component::ComponentSpec;
use crate::result::{ComponentResultSpec, ResultMap, State};
use crate::solution::{InstanceSpec, SolutionSpec};
use crate::target::TargetSpec;

/// Everything a provider needs to know about one deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default)]
    pub solution_name: String,
    #[serde(default)]
    pub solution: SolutionSpec,
    #[serde(default)]
    pub instance: InstanceSpec,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetSpec>,
    /// Target name to `{c1}{c2}...`
    #[serde(default)]
    pub assignments: BTreeMap<String, String>,
    /// Restricts providers to a single target when set
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub active_target: String,
}

impl DeploymentSpec {
    /// Name of the deployed instance
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance.name
    }

    /// Component parameter lookup, instance parameters override component defaults
    #[must_use]
    pub fn parameter(&self, component: &str, key: &str) -> Option<String> {
        if let Some(v) = self.instance.parameters.get(key) {
            return Some(v.clone());
        }
        self.solution
            .component(component)
            .and_then(|c| c.parameters.get(key).cloned())
    }

    /// Solution components grouped by type
    #[must_use]
    pub fn components_by_type(&self) -> HashMap<&str, Vec<&ComponentSpec>> {
        let mut ret: HashMap<&str, Vec<&ComponentSpec>> = HashMap::new();
        for c in &self.solution.components {
            ret.entry(c.component_type.as_str()).or_default().push(c);
        }
        ret
    }
}

/// The action to take for one component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentAction {
    Update,
    Delete,
}

/// A single component action within a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStep {
    pub action: ComponentAction,
    pub component: ComponentSpec,
}

impl ComponentStep {
    #[must_use]
    pub fn update(component: ComponentSpec) -> Self {
        Self {
            action: ComponentAction::Update,
            component,
        }
    }

    #[must_use]
    pub fn delete(component: ComponentSpec) -> Self {
        Self {
            action: ComponentAction::Delete,
            component,
        }
    }
}

/// Ordered component actions for one target and role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStep {
    pub target: String,
    #[serde(default)]
    pub components: Vec<ComponentStep>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default)]
    pub is_first: bool,
}

impl DeploymentStep {
    pub fn new(target: impl Into<String>, components: Vec<ComponentStep>) -> Self {
        Self {
            target: target.into(),
            components,
            ..Self::default()
        }
    }

    /// Result map with every component marked `Untouched`
    #[must_use]
    pub fn prepare_result_map(&self) -> ResultMap {
        self.components
            .iter()
            .map(|c| {
                (
                    c.component.name.clone(),
                    ComponentResultSpec::new(State::Untouched, ""),
                )
            })
            .collect()
    }

    #[must_use]
    pub fn components(&self) -> Vec<ComponentSpec> {
        self.components.iter().map(|c| c.component.clone()).collect()
    }

    #[must_use]
    pub fn updated_components(&self) -> Vec<ComponentSpec> {
        self.with_action(ComponentAction::Update)
    }

    #[must_use]
    pub fn deleted_components(&self) -> Vec<ComponentSpec> {
        self.with_action(ComponentAction::Delete)
    }

    #[must_use]
    pub fn updated_steps(&self) -> Vec<ComponentStep> {
        self.components
            .iter()
            .filter(|c| c.action == ComponentAction::Update)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    fn with_action(&self, action: ComponentAction) -> Vec<ComponentSpec> {
        self.components
            .iter()
            .filter(|c| c.action == action)
            .map(|c| c.component.clone())
            .collect()
    }

    fn only_updates(&self) -> Self {
        Self {
            components: self.updated_steps(),
            ..self.shallow()
        }
    }

    fn reversed_deletions(&self) -> Self {
        Self {
            components: self
                .components
                .iter()
                .rev()
                .filter(|c| c.action == ComponentAction::Delete)
                .cloned()
                .collect(),
            ..self.shallow()
        }
    }

    fn shallow(&self) -> Self {
        Self {
            target: self.target.clone(),
            components: Vec::new(),
            role: self.role.clone(),
            is_first: self.is_first,
        }
    }
}

/// Ordered steps across targets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub steps: Vec<DeploymentStep>,
}

impl DeploymentPlan {
    /// Reorders the plan so all updates run before any deletion
    ///
    /// Mixed steps are split. Deletion steps run in reverse plan order and
    /// deletions within a split step are reversed too.
    #[must_use]
    pub fn revised_for_deletion(&self) -> Self {
        let mut steps = Vec::new();
        let mut deleted = Vec::new();
        for step in &self.steps {
            let deletions = step
                .components
                .iter()
                .filter(|c| c.action == ComponentAction::Delete)
                .count();
            if deletions == 0 {
                steps.push(step.clone());
            } else if deletions == step.components.len() {
                deleted.push(step.clone());
            } else {
                steps.push(step.only_updates());
                deleted.push(step.reversed_deletions());
            }
        }
        steps.extend(deleted.into_iter().rev());
        Self { steps }
    }
}

//! Desired/current diffing and outcome aggregation

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use convoy_model::{ComponentSpec, ComponentStep, DeploymentStep, ResultMap, ValidationRule};

/// Step that moves `current` to `desired` on one target
///
/// Missing or changed desired components become updates in desired order,
/// followed by deletions for current components no longer desired.
#[must_use]
pub fn plan_step(
    target: &str,
    desired: &[ComponentSpec],
    current: &[ComponentSpec],
    rule: &ValidationRule,
) -> DeploymentStep {
    let current_by_name: HashMap<&str, &ComponentSpec> =
        current.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut steps: Vec<ComponentStep> = desired
        .iter()
        .filter(|d| {
            current_by_name
                .get(d.name.as_str())
                .is_none_or(|c| rule.is_component_changed(c, d))
        })
        .map(|d| ComponentStep::update(d.clone()))
        .collect();

    steps.extend(
        current
            .iter()
            .filter(|c| !desired.iter().any(|d| d.name == c.name))
            .map(|c| ComponentStep::delete(c.clone())),
    );

    DeploymentStep::new(target, steps)
}

/// What happened on one target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub results: ResultMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.results.values().all(|r| !r.status.is_failure())
    }
}

/// Per-target outcomes of one deployment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSummary {
    pub instance: String,
    pub success: bool,
    pub dry_run: bool,
    pub targets: BTreeMap<String, TargetOutcome>,
}

impl DeploymentSummary {
    /// Names of targets that did not reconcile cleanly
    #[must_use]
    pub fn failed_targets(&self) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Total number of component results across targets
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.targets.values().map(|o| o.results.len()).sum()
    }
}

/// Collects target outcomes as they arrive
#[derive(Debug, Clone)]
pub struct ResultCollector {
    instance: String,
    dry_run: bool,
    outcomes: BTreeMap<String, TargetOutcome>,
}

impl ResultCollector {
    pub fn new(instance: impl Into<String>, dry_run: bool) -> Self {
        Self {
            instance: instance.into(),
            dry_run,
            outcomes: BTreeMap::new(),
        }
    }

    /// Merge results for `target`, later entries win per component
    pub fn record(&mut self, target: &str, results: ResultMap) {
        self.outcomes
            .entry(target.to_string())
            .or_default()
            .results
            .extend(results);
    }

    /// Merge partial results and keep the first error for `target`
    pub fn record_failure(&mut self, target: &str, results: ResultMap, error: impl Into<String>) {
        let outcome = self.outcomes.entry(target.to_string()).or_default();
        outcome.results.extend(results);
        if outcome.error.is_none() {
            outcome.error = Some(error.into());
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    #[must_use]
    pub fn finish(self) -> DeploymentSummary {
        let success = self.outcomes.values().all(TargetOutcome::is_success);
        DeploymentSummary {
            instance: self.instance,
            success,
            dry_run: self.dry_run,
            targets: self.outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use convoy_model::{ComponentAction, ComponentResultSpec, PropertyDesc, State};

    use super::*;

    fn names(step: &DeploymentStep) -> Vec<(ComponentAction, String)> {
        step.components
            .iter()
            .map(|c| (c.action, c.component.name.clone()))
            .collect()
    }

    fn watching(key: &str) -> ValidationRule {
        ValidationRule {
            change_detection_properties: vec![PropertyDesc::new(key)],
            ..ValidationRule::default()
        }
    }

    #[test]
    fn test_plan_step_orders_updates_then_deletes() {
        let desired = vec![
            ComponentSpec::new("web", "").with_property("image", "web:2"),
            ComponentSpec::new("db", "").with_property("image", "db:1"),
            ComponentSpec::new("cache", ""),
        ];
        let current = vec![
            ComponentSpec::new("old", ""),
            ComponentSpec::new("db", "").with_property("image", "db:1"),
            ComponentSpec::new("web", "").with_property("image", "web:1"),
        ];
        let step = plan_step("edge", &desired, &current, &watching("image"));
        assert_eq!(step.target, "edge");
        assert_eq!(
            names(&step),
            vec![
                (ComponentAction::Update, "web".to_string()),
                (ComponentAction::Update, "cache".to_string()),
                (ComponentAction::Delete, "old".to_string()),
            ]
        );
    }

    #[test]
    fn test_plan_step_ignores_undeclared_properties() {
        let desired = vec![ComponentSpec::new("web", "").with_property("status", "new")];
        let current = vec![ComponentSpec::new("web", "").with_property("status", "old")];
        let step = plan_step("edge", &desired, &current, &watching("image"));
        assert!(step.is_empty());
    }

    #[test]
    fn test_plan_step_from_empty() {
        let desired = vec![ComponentSpec::new("a", ""), ComponentSpec::new("b", "")];
        let step = plan_step("t", &desired, &[], &ValidationRule::default());
        assert_eq!(step.updated_components().len(), 2);
        let step = plan_step("t", &[], &desired, &ValidationRule::default());
        assert_eq!(step.deleted_components().len(), 2);
    }

    #[test]
    fn test_collector_summary() {
        let mut collector = ResultCollector::new("shop-1", false);
        collector.record(
            "a",
            [("web".to_string(), ComponentResultSpec::new(State::Updated, ""))].into(),
        );
        collector.record_failure(
            "b",
            [("db".to_string(), ComponentResultSpec::new(State::UpdateFailed, "boom"))].into(),
            "provider error: boom",
        );
        collector.record_failure("b", ResultMap::new(), "second");

        let summary = collector.finish();
        assert!(!summary.success);
        assert_eq!(summary.failed_targets(), vec!["b"]);
        assert_eq!(summary.component_count(), 2);
        assert_eq!(summary.targets["b"].error.as_deref(), Some("provider error: boom"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["dryRun"], false);
        assert!(json["targets"]["a"].get("error").is_none());
    }

    #[test]
    fn test_failed_status_without_error_is_failure() {
        let outcome = TargetOutcome {
            results: [("x".to_string(), ComponentResultSpec::new(State::DeleteFailed, ""))].into(),
            error: None,
        };
        assert!(!outcome.is_success());
        assert!(ResultCollector::new("i", true).finish().success);
    }
}

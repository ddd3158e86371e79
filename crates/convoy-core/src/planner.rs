//! Component to target assignment
//!
//! A component without a `constraints` expression goes to every target. A
//! component with one goes to the targets whose properties make the
//! expression evaluate to `true`. Assignments are encoded as `{a}{b}` in
//! solution order.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use convoy_model::{ComponentSpec, DeploymentSpec, InstanceSpec, SolutionSpec, TargetSpec};

use crate::error::CoreError;
use crate::expr::{self, EvalContext};

/// Whether `component` belongs on `target`
pub fn is_assigned(component: &ComponentSpec, target: &TargetSpec) -> Result<bool, CoreError> {
    if component.constraints.trim().is_empty() {
        return Ok(true);
    }
    let ctx = EvalContext::with_properties(target.properties.clone());
    let result = expr::evaluate(&component.constraints, &ctx).inspect_err(|e| {
        warn!(
            component = %component.name,
            target = %target.name,
            error = %e,
            "constraint expression failed"
        );
    })?;
    Ok(result.is_truthy_literal())
}

/// Assignment string for every target
pub fn assign_components(
    solution: &SolutionSpec,
    targets: &BTreeMap<String, TargetSpec>,
) -> Result<BTreeMap<String, String>, CoreError> {
    let mut assignments = BTreeMap::new();
    for (name, target) in targets {
        let mut assigned = String::new();
        for component in &solution.components {
            if is_assigned(component, target)? {
                assigned.push('{');
                assigned.push_str(&component.name);
                assigned.push('}');
            }
        }
        debug!(target = %name, assignment = %assigned, "assigned components");
        assignments.insert(name.clone(), assigned);
    }
    Ok(assignments)
}

/// Assemble a deployment for `instance` over the targets it selects
pub fn build_deployment(
    solution: &SolutionSpec,
    instance: &InstanceSpec,
    targets: &[TargetSpec],
) -> Result<DeploymentSpec, CoreError> {
    let selected: BTreeMap<String, TargetSpec> = targets
        .iter()
        .filter(|t| instance.target.selects(&t.name, &t.properties))
        .map(|t| (t.name.clone(), t.clone()))
        .collect();
    if selected.is_empty() {
        return Err(CoreError::Planning(format!(
            "instance {} selects no targets",
            instance.name
        )));
    }
    let assignments = assign_components(solution, &selected)?;
    Ok(DeploymentSpec {
        solution_name: instance.solution.clone(),
        solution: solution.clone(),
        instance: instance.clone(),
        targets: selected,
        assignments,
        active_target: String::new(),
    })
}

/// Decode an assignment string into component names
#[must_use]
pub fn parse_assignment(assignment: &str) -> Vec<&str> {
    let trimmed = assignment.trim();
    let Some(inner) = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
    else {
        return Vec::new();
    };
    inner.split("}{").filter(|s| !s.is_empty()).collect()
}

/// Components assigned to `target`, in solution order
pub fn components_for_target(
    deployment: &DeploymentSpec,
    target: &str,
) -> Result<Vec<ComponentSpec>, CoreError> {
    let assignment = deployment
        .assignments
        .get(target)
        .ok_or_else(|| CoreError::TargetNotFound(target.to_string()))?;
    parse_assignment(assignment)
        .into_iter()
        .map(|name| {
            deployment.solution.component(name).cloned().ok_or_else(|| {
                CoreError::Planning(format!(
                    "component {name} assigned to {target} is not in the solution"
                ))
            })
        })
        .collect()
}

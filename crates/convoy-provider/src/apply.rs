//! Shared helpers for implementing `TargetProvider::apply`

use convoy_model::{ComponentResultSpec, DeploymentStep, ResultMap, State, ValidationRule};

use crate::error::{ApplyFailure, ProviderError};

/// Validate every component of the step before any side effect
///
/// On failure every component in the step is marked `ValidateFailed`.
pub fn validate_step(rule: &ValidationRule, step: &DeploymentStep) -> Result<(), ApplyFailure> {
    rule.validate(&step.components()).map_err(|e| {
        let error = ProviderError::from(e);
        let message = error.to_string();
        let results = step
            .components
            .iter()
            .map(|c| {
                (
                    c.component.name.clone(),
                    ComponentResultSpec::new(State::ValidateFailed, message.clone()),
                )
            })
            .collect();
        ApplyFailure::new(results, error)
    })
}

/// Record a failing component and stop the apply
pub fn fail_component(
    mut results: ResultMap,
    component: &str,
    state: State,
    message: impl Into<String>,
) -> ApplyFailure {
    let message = message.into();
    results.insert(
        component.to_string(),
        ComponentResultSpec::new(state, message.clone()),
    );
    ApplyFailure::new(results, ProviderError::operation(component, state, message))
}

/// Mark every component of `names` with `state`, keeping existing entries
/// that already carry a more specific outcome
pub fn mark_all<'a>(
    results: &mut ResultMap,
    names: impl IntoIterator<Item = &'a str>,
    state: State,
    message: &str,
) {
    for name in names {
        let entry = results
            .entry(name.to_string())
            .or_insert_with(|| ComponentResultSpec::new(State::Untouched, ""));
        if entry.status == State::Untouched {
            *entry = ComponentResultSpec::new(state, message);
        }
    }
}

/// Fold the result map a remote agent returned for a completed phase
///
/// Components the remote left out are marked `done`. A failure status in the
/// remote map fails the phase even though the call itself succeeded.
pub fn merge_remote_success(
    results: &mut ResultMap,
    names: &[String],
    done: State,
    remote: Option<ResultMap>,
) -> Result<(), ProviderError> {
    if let Some(failure) = remote.and_then(|r| absorb_remote(results, r)) {
        return Err(failure);
    }
    mark_all(results, names.iter().map(String::as_str), done, "");
    Ok(())
}

/// Fold a failed remote phase
///
/// A partial map that names the failing component is taken as is, leaving
/// the components the remote never reached `Untouched`. Without one, every
/// component of the phase still untouched is marked `failed`.
pub fn merge_remote_failure(
    results: &mut ResultMap,
    names: &[String],
    failed: State,
    remote: Option<ResultMap>,
    error: &ProviderError,
) {
    let reported = remote
        .and_then(|r| absorb_remote(results, r))
        .is_some();
    if !reported {
        mark_all(results, names.iter().map(String::as_str), failed, &error.to_string());
    }
}

/// Copy `remote` into `results`, returning the first failure it reports
fn absorb_remote(results: &mut ResultMap, remote: ResultMap) -> Option<ProviderError> {
    let mut failure = None;
    for (name, result) in remote {
        if failure.is_none() && result.status.is_failure() {
            failure = Some(ProviderError::operation(
                name.clone(),
                result.status,
                result.message.clone(),
            ));
        }
        results.insert(name, result);
    }
    failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_model::{ComponentSpec, ComponentStep};

    #[test]
    fn test_validate_step_marks_every_component() {
        let rule = ValidationRule {
            required_properties: vec!["http.url".to_string()],
            ..ValidationRule::default()
        };
        let step = DeploymentStep::new(
            "t",
            vec![
                ComponentStep::update(ComponentSpec::new("a", "").with_property("http.url", "x")),
                ComponentStep::update(ComponentSpec::new("b", "")),
            ],
        );
        let failure = validate_step(&rule, &step).unwrap_err();
        assert_eq!(failure.results.len(), 2);
        assert!(
            failure
                .results
                .values()
                .all(|r| r.status == State::ValidateFailed)
        );
        assert!(matches!(failure.error, ProviderError::Validation(_)));
    }

    #[test]
    fn test_mark_all_keeps_specific_outcomes() {
        let mut results = ResultMap::new();
        results.insert("a".into(), ComponentResultSpec::new(State::UpdateFailed, "x"));
        results.insert("b".into(), ComponentResultSpec::new(State::Untouched, ""));
        mark_all(&mut results, ["a", "b"], State::Updated, "");
        assert_eq!(results["a"].status, State::UpdateFailed);
        assert_eq!(results["b"].status, State::Updated);
    }

    fn untouched(names: &[&str]) -> ResultMap {
        names
            .iter()
            .map(|n| ((*n).to_string(), ComponentResultSpec::new(State::Untouched, "")))
            .collect()
    }

    fn owned(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn test_remote_failure_keeps_reached_components() {
        let mut results = untouched(&["a", "db", "c"]);
        let mut remote = ResultMap::new();
        remote.insert("a".into(), ComponentResultSpec::new(State::Updated, ""));
        remote.insert("db".into(), ComponentResultSpec::new(State::UpdateFailed, "boom"));
        remote.insert("c".into(), ComponentResultSpec::new(State::Untouched, ""));

        let error = ProviderError::Remote {
            state: State::UpdateFailed,
            message: "db: boom".into(),
        };
        merge_remote_failure(
            &mut results,
            &owned(&["a", "db", "c"]),
            State::UpdateFailed,
            Some(remote),
            &error,
        );
        assert_eq!(results["a"].status, State::Updated);
        assert_eq!(results["db"].status, State::UpdateFailed);
        assert_eq!(results["c"].status, State::Untouched);
    }

    #[test]
    fn test_remote_failure_without_map_marks_phase_failed() {
        let mut results = untouched(&["a", "b"]);
        let error = ProviderError::Transport("gone".into());
        merge_remote_failure(&mut results, &owned(&["a", "b"]), State::DeleteFailed, None, &error);
        assert!(results.values().all(|r| r.status == State::DeleteFailed));
        assert_eq!(results["a"].message, "transport error: gone");
    }

    #[test]
    fn test_remote_success_with_failed_component_fails() {
        let mut results = untouched(&["a", "b"]);
        let mut remote = ResultMap::new();
        remote.insert("a".into(), ComponentResultSpec::new(State::Updated, ""));
        remote.insert("b".into(), ComponentResultSpec::new(State::UpdateFailed, "disk full"));

        let err = merge_remote_success(&mut results, &owned(&["a", "b"]), State::Updated, Some(remote))
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Operation { ref component, state: State::UpdateFailed, .. } if component == "b"
        ));
        assert_eq!(results["a"].status, State::Updated);
        assert_eq!(results["b"].message, "disk full");
    }

    #[test]
    fn test_remote_success_marks_unreported_done() {
        let mut results = untouched(&["a", "b"]);
        merge_remote_success(&mut results, &owned(&["a", "b"]), State::Deleted, None).unwrap();
        assert!(results.values().all(|r| r.status == State::Deleted));
    }
}

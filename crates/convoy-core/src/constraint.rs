//! Constraint scoring
//!
//! A constraint scores a property set with a small sentinel alphabet:
//!
//! | score | meaning |
//! |---|---|
//! | `-1` | hard denial, the candidate must be excluded |
//! | `-2` | hard admission, a `must` rule is satisfied |
//! | `-3` | neutral, value present but no decision |
//! | `0..` | preference weight, higher is better |
//!
//! In a list, any negative score dominates the accumulated preference and
//! the least severe negative wins.

use std::collections::HashMap;

use convoy_model::{ComponentSpec, ConstraintSpec, TargetSpec};

use crate::error::CoreError;
use crate::matcher::match_string;

pub const DENY: i32 = -1;
pub const ADMIT: i32 = -2;
pub const NEUTRAL: i32 = -3;
/// Below every sentinel, means no negative score was seen
const NO_NEGATIVE: i32 = -4;

/// Constraint severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    Must,
    Prefer,
    Reject,
    None,
}

impl Qualifier {
    fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "must" => Ok(Qualifier::Must),
            "prefer" => Ok(Qualifier::Prefer),
            "reject" => Ok(Qualifier::Reject),
            "" => Ok(Qualifier::None),
            other => Err(CoreError::Constraint(format!("unknown qualifier '{other}'"))),
        }
    }
}

/// Score one constraint against `properties`
///
/// A missing property matches like an empty string.
pub fn evaluate_constraint(
    constraint: &ConstraintSpec,
    properties: &HashMap<String, String>,
) -> Result<i32, CoreError> {
    let qualifier = Qualifier::parse(&constraint.qualifier)?;

    if !constraint.value.is_empty() {
        let actual = properties
            .get(&constraint.key)
            .map_or("", String::as_str);
        let matched = match_string(&constraint.value, actual);
        return Ok(match (matched, qualifier) {
            (true, Qualifier::Reject) => DENY,
            (true, Qualifier::Prefer) => 1,
            (true, Qualifier::Must) => ADMIT,
            (true, Qualifier::None) => NEUTRAL,
            (false, Qualifier::Reject) => ADMIT,
            (false, Qualifier::Prefer) => 0,
            (false, Qualifier::Must) => DENY,
            (false, Qualifier::None) => 0,
        });
    }

    if constraint.values.is_empty() || constraint.operator.is_empty() {
        return Err(CoreError::Constraint("incomplete constraint".to_string()));
    }
    if constraint.operator != "any" {
        return Err(CoreError::Constraint(format!(
            "unsupported operator '{}'",
            constraint.operator
        )));
    }

    let nested = constraint
        .nested()
        .map_err(|e| CoreError::Constraint(format!("malformed nested constraint: {e}")))?;
    let scores = nested
        .iter()
        .map(|c| evaluate_constraint(c, properties))
        .collect::<Result<Vec<_>, _>>()?;
    let denied = scores.contains(&DENY);

    Ok(match qualifier {
        Qualifier::Must => {
            if denied {
                DENY
            } else {
                0
            }
        }
        Qualifier::Prefer => {
            if denied {
                DENY
            } else {
                scores
                    .iter()
                    .map(|&s| if s <= ADMIT { 1 } else { s })
                    .sum()
            }
        }
        Qualifier::Reject => {
            if scores.iter().all(|&s| s == 0) {
                0
            } else {
                DENY
            }
        }
        Qualifier::None => {
            if denied {
                DENY
            } else if scores.iter().any(|&s| s == NEUTRAL || s == 0) {
                NEUTRAL
            } else {
                0
            }
        }
    })
}

/// Score a constraint list
///
/// Non-negative scores are summed. If any negative score appears the result
/// is the greatest negative seen and the sum is discarded.
pub fn evaluate_constraints(
    constraints: &[ConstraintSpec],
    properties: &HashMap<String, String>,
) -> Result<i32, CoreError> {
    let mut sum = 0;
    let mut max_negative = NO_NEGATIVE;
    for constraint in constraints {
        let score = evaluate_constraint(constraint, properties)?;
        if score >= 0 {
            sum += score;
        } else {
            max_negative = max_negative.max(score);
        }
    }
    Ok(if max_negative > NO_NEGATIVE {
        max_negative
    } else {
        sum
    })
}

/// Compatibility of placing `component` on `target`, `None` if denied
///
/// Scores the target's constraints against the component's properties and
/// the component's placement rules against the target's properties.
pub fn evaluate_target_compatibility(
    target: &TargetSpec,
    component: &ComponentSpec,
) -> Result<Option<i32>, CoreError> {
    let target_score = evaluate_constraints(&target.constraints, &component.property_strings())?;
    let component_score = evaluate_constraints(&component.placement, &target.properties)?;
    if target_score == DENY || component_score == DENY {
        return Ok(None);
    }
    Ok(Some(target_score.max(0) + component_score.max(0)))
}

/// Admissible targets for `component`, best first, ties broken by name
pub fn rank_targets<'a>(
    component: &ComponentSpec,
    targets: impl IntoIterator<Item = &'a TargetSpec>,
) -> Result<Vec<(String, i32)>, CoreError> {
    let mut ranked = Vec::new();
    for target in targets {
        if let Some(score) = evaluate_target_compatibility(target, component)? {
            ranked.push((target.name.clone(), score));
        }
    }
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(ranked)
}

//! Solutions and instances

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::component::ComponentSpec;

/// An ordered set of components deployed together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionSpec {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl SolutionSpec {
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Selects targets by exact name and/or label match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSelector {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub selector: HashMap<String, String>,
}

impl TargetSelector {
    /// Whether a target with the given name and properties is selected
    ///
    /// An empty selector selects everything.
    #[must_use]
    pub fn selects(&self, name: &str, properties: &HashMap<String, String>) -> bool {
        if !self.name.is_empty() && self.name != name {
            return false;
        }
        self.selector
            .iter()
            .all(|(k, v)| properties.get(k).is_some_and(|p| p == v))
    }
}

/// A request to deploy a solution onto selected targets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    pub name: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub target: TargetSelector,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Monotonic change counter
    #[serde(default)]
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector() {
        let mut props = HashMap::new();
        props.insert("group".to_string(), "edge".to_string());

        assert!(TargetSelector::default().selects("any", &props));

        let by_name = TargetSelector {
            name: "t1".to_string(),
            ..TargetSelector::default()
        };
        assert!(by_name.selects("t1", &props));
        assert!(!by_name.selects("t2", &props));

        let mut labels = HashMap::new();
        labels.insert("group".to_string(), "cloud".to_string());
        let by_label = TargetSelector {
            selector: labels,
            ..TargetSelector::default()
        };
        assert!(!by_label.selects("t1", &props));
    }
}

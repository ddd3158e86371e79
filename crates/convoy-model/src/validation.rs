//! Provider validation rules and change detection

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::component::ComponentSpec;
use crate::error::ModelError;
use crate::value::Value;

/// A property whose change matters for redeployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDesc {
    /// Property name, may contain `*` wildcards
    pub name: String,
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default)]
    pub skip_if_missing: bool,
    #[serde(default)]
    pub prefix_match: bool,
    /// Compare the component name instead of a property
    #[serde(default)]
    pub is_component_name: bool,
}

impl PropertyDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn component_name() -> Self {
        Self {
            name: "name".to_string(),
            is_component_name: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    #[must_use]
    pub fn skip_if_missing(mut self) -> Self {
        self.skip_if_missing = true;
        self
    }

    #[must_use]
    pub fn prefix_match(mut self) -> Self {
        self.prefix_match = true;
        self
    }
}

/// Static description of what components a provider accepts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    #[serde(rename = "requiredType", default)]
    pub required_component_type: String,
    #[serde(default)]
    pub required_properties: Vec<String>,
    #[serde(default)]
    pub optional_properties: Vec<String>,
    #[serde(default)]
    pub required_metadata: Vec<String>,
    #[serde(default)]
    pub optional_metadata: Vec<String>,
    #[serde(rename = "changeDetection", default)]
    pub change_detection_properties: Vec<PropertyDesc>,
    #[serde(default)]
    pub change_detection_metadata: Vec<PropertyDesc>,
    /// Provider can deploy to scopes other than `default`
    #[serde(rename = "supportScopes", default)]
    pub scope_isolation: bool,
    /// Provider can host several instances on one target
    #[serde(default)]
    pub instance_isolation: bool,
}

impl ValidationRule {
    /// Validate every component, stopping at the first failure
    pub fn validate(&self, components: &[ComponentSpec]) -> Result<(), ModelError> {
        components
            .iter()
            .try_for_each(|c| self.validate_component(c))
    }

    /// Check required type, properties and metadata of one component
    ///
    /// A key that is absent or maps to an empty string counts as missing.
    pub fn validate_component(&self, component: &ComponentSpec) -> Result<(), ModelError> {
        if !self.required_component_type.is_empty()
            && self.required_component_type != component.component_type
        {
            return Err(ModelError::Validation(format!(
                "provider requires component type '{}', but '{}' is found instead",
                self.required_component_type, component.component_type
            )));
        }

        for p in &self.required_properties {
            if component.properties.get(p).is_none_or(Value::is_empty) {
                return Err(ModelError::Validation(format!(
                    "required property '{p}' is missing"
                )));
            }
        }

        for p in &self.required_metadata {
            if component.metadata.get(p).is_none_or(String::is_empty) {
                return Err(ModelError::Validation(format!(
                    "required metadata '{p}' is missing"
                )));
            }
        }

        Ok(())
    }

    /// Whether `new` differs from `old` on any change-detection property or metadata
    ///
    /// With no change-detection properties declared nothing counts as a change.
    #[must_use]
    pub fn is_component_changed(&self, old: &ComponentSpec, new: &ComponentSpec) -> bool {
        let old_props = stringify(&old.properties);
        let new_props = stringify(&new.properties);
        if detect_changes(
            &self.change_detection_properties,
            &old.name,
            &new.name,
            &old_props,
            &new_props,
        ) {
            return true;
        }
        detect_changes(
            &self.change_detection_metadata,
            &old.name,
            &new.name,
            &old.metadata,
            &new.metadata,
        )
    }
}

fn stringify(properties: &HashMap<String, Value>) -> HashMap<String, String> {
    properties
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect()
}

fn detect_changes(
    descs: &[PropertyDesc],
    old_name: &str,
    new_name: &str,
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
) -> bool {
    for desc in descs {
        if desc.name.contains('*') {
            let Some(re) = wildcard_regex(&desc.name) else {
                continue;
            };
            if old
                .keys()
                .filter(|k| re.is_match(k))
                .any(|k| compare_properties(desc, old, new, k))
            {
                return true;
            }
        } else if desc.is_component_name {
            if !compare_strings(old_name, new_name, desc.ignore_case, desc.prefix_match) {
                return true;
            }
        } else if compare_properties(desc, old, new, &desc.name) {
            return true;
        }
    }
    false
}

fn wildcard_regex(name: &str) -> Option<Regex> {
    let pattern = regex::escape(name).replace(r"\*", ".*");
    Regex::new(&format!("^{pattern}$")).ok()
}

fn compare_strings(a: &str, b: &str, ignore_case: bool, prefix_match: bool) -> bool {
    let (a, b) = if ignore_case {
        (a.to_lowercase(), b.to_lowercase())
    } else {
        (a.to_string(), b.to_string())
    };
    if prefix_match {
        a.starts_with(&b) || b.starts_with(&a)
    } else {
        a == b
    }
}

/// True when the property counts as changed
fn compare_properties(
    desc: &PropertyDesc,
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
    key: &str,
) -> bool {
    match (old.get(key), new.get(key)) {
        (Some(o), Some(n)) => !compare_strings(o, n, desc.ignore_case, desc.prefix_match),
        _ => !desc.skip_if_missing,
    }
}

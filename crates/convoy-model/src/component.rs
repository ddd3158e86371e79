//! Component descriptors

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constraint::ConstraintSpec;
use crate::value::Value;

/// One named unit of desired state within a solution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Unique name within the solution
    pub name: String,
    /// Component type (e.g. `container`, `helm.v3`)
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub component_type: String,
    /// Provider-specific properties
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Value>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Default values for `$param()` lookups
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    /// Boolean placement expression evaluated against target properties
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub constraints: String,
    /// Qualified placement rules scored against target properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub placement: Vec<ConstraintSpec>,
    /// Typed routes exposed by the component
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteSpec>,
    /// Names of components this one depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl ComponentSpec {
    /// Create a component with just a name and type
    pub fn new(name: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component_type: component_type.into(),
            ..Self::default()
        }
    }

    /// Set a property
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the boolean placement expression
    #[must_use]
    pub fn with_constraints(mut self, expr: impl Into<String>) -> Self {
        self.constraints = expr.into();
        self
    }

    /// Read a property as a string, empty when missing
    #[must_use]
    pub fn property_string(&self, key: &str) -> String {
        self.properties
            .get(key)
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Stringified view of all properties, used for constraint scoring
    #[must_use]
    pub fn property_strings(&self) -> HashMap<String, String> {
        self.properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

/// Whether some desired component has no counterpart in `current`
///
/// Identity is decided by `same`, which lets providers compare on a secondary
/// key as well as the name.
pub fn needs_update_by<F>(desired: &[ComponentSpec], current: &[ComponentSpec], same: F) -> bool
where
    F: Fn(&ComponentSpec, &ComponentSpec) -> bool,
{
    !desired.iter().all(|d| current.iter().any(|c| same(d, c)))
}

/// Whether any desired component is present in `current`
pub fn needs_remove_by<F>(desired: &[ComponentSpec], current: &[ComponentSpec], same: F) -> bool
where
    F: Fn(&ComponentSpec, &ComponentSpec) -> bool,
{
    desired.iter().any(|d| current.iter().any(|c| same(d, c)))
}

/// [`needs_update_by`] comparing names
#[must_use]
pub fn needs_update(desired: &[ComponentSpec], current: &[ComponentSpec]) -> bool {
    needs_update_by(desired, current, |a, b| a.name == b.name)
}

/// [`needs_remove_by`] comparing names
#[must_use]
pub fn needs_remove(desired: &[ComponentSpec], current: &[ComponentSpec]) -> bool {
    needs_remove_by(desired, current, |a, b| a.name == b.name)
}

/// A typed route descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    pub route: String,
    #[serde(rename = "type")]
    pub route_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
}

//! Target descriptors

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::component::ComponentSpec;
use crate::constraint::ConstraintSpec;

/// A deployable endpoint with its provider bindings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topologies: Vec<TopologySpec>,
    /// Components the target describes for itself
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentSpec>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl TargetSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_binding(mut self, binding: BindingSpec) -> Self {
        if let Some(topology) = self.topologies.first_mut() {
            topology.bindings.push(binding);
        } else {
            self.topologies.push(TopologySpec {
                bindings: vec![binding],
            });
        }
        self
    }

    /// All bindings across topologies, in declaration order
    pub fn bindings(&self) -> impl Iterator<Item = &BindingSpec> {
        self.topologies.iter().flat_map(|t| t.bindings.iter())
    }

    /// First binding for the given role
    #[must_use]
    pub fn binding_for_role(&self, role: &str) -> Option<&BindingSpec> {
        self.bindings().find(|b| b.role == role)
    }
}

/// An ordered group of provider bindings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySpec {
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,
}

/// Binds a component role to a provider type and its flat configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSpec {
    pub role: String,
    pub provider: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl BindingSpec {
    pub fn new(role: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            provider: provider.into(),
            config: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

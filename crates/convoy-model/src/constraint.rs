//! Qualified placement constraints

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// A qualified key/value placement rule
///
/// Either `value` is set (single match against the property `key`) or
/// `values` holds JSON-encoded nested constraints combined by `operator`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintSpec {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator: String,
    /// `must`, `prefer`, `reject` or empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qualifier: String,
}

impl ConstraintSpec {
    /// Single-value constraint
    pub fn single(
        key: impl Into<String>,
        value: impl Into<String>,
        qualifier: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            qualifier: qualifier.into(),
            ..Self::default()
        }
    }

    /// Composite constraint using the `any` operator
    ///
    /// The nested constraints are JSON-encoded, which is how they travel on
    /// the wire.
    pub fn any_of(
        qualifier: impl Into<String>,
        nested: &[ConstraintSpec],
    ) -> Result<Self, ModelError> {
        let values = nested
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            values,
            operator: "any".to_string(),
            qualifier: qualifier.into(),
            ..Self::default()
        })
    }

    /// Decode the JSON-encoded nested constraints
    pub fn nested(&self) -> Result<Vec<ConstraintSpec>, ModelError> {
        self.values
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(ModelError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_of_nests_json() {
        let inner = ConstraintSpec::single("os", "linux", "prefer");
        let outer = ConstraintSpec::any_of("must", &[inner.clone()]).unwrap();
        assert_eq!(outer.operator, "any");
        assert_eq!(outer.values.len(), 1);
        assert_eq!(outer.nested().unwrap(), vec![inner]);
    }

    #[test]
    fn test_nested_malformed_entry() {
        let c = ConstraintSpec {
            values: vec!["{not json".to_string()],
            operator: "any".to_string(),
            ..ConstraintSpec::default()
        };
        assert!(matches!(c.nested(), Err(ModelError::Serialization(_))));
    }
}

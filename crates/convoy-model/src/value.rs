//! Dynamically typed property values

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A property value as carried by components and produced by expressions
///
/// Numbers are always `f64`, matching the expression language which has a
/// single numeric type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Numeric view of the value
    ///
    /// Numbers are returned as-is and strings are parsed, so `"42"` coerces.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Boolean view of the value (`true`/`false` strings are accepted)
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// Returns the string slice if this is a string value
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is a number (no string coercion)
    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    /// True only for boolean `true` or the literal string `"true"`
    #[must_use]
    pub fn is_truthy_literal(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::String(s) => s == "true",
            _ => false,
        }
    }

    /// Whether the value is null or an empty string
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }
}

/// Formats a number the way the expression language prints it: integral
/// values lose their fractional part (`2.0` prints as `2`).
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        let i = n as i64;
        i.to_string()
    } else {
        n.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::List(_) | Value::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_numbers() {
        assert_eq!(Value::Number(2.0).to_string(), "2");
        assert_eq!(Value::Number(-3.0).to_string(), "-3");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_coercions() {
        assert_eq!(Value::from("42").as_number(), Some(42.0));
        assert_eq!(Value::from("abc").as_number(), None);
        assert_eq!(Value::from("TRUE").as_bool(), Some(true));
        assert!(Value::from("true").is_truthy_literal());
        assert!(!Value::from("TRUE").is_truthy_literal());
        assert!(Value::Bool(true).is_truthy_literal());
    }

    #[test]
    fn test_deserialize_untagged() {
        let v: Value = serde_json::from_str(r#"{"a": 1, "b": [true, "x"], "c": null}"#).unwrap();
        let Value::Map(map) = v else {
            panic!("expected map");
        };
        assert_eq!(map["a"], Value::Number(1.0));
        assert_eq!(
            map["b"],
            Value::List(vec![Value::Bool(true), Value::from("x")])
        );
        assert_eq!(map["c"], Value::Null);
    }
}

//! Property schema checks
//!
//! A [`Schema`] describes per-property type, presence, pattern and
//! expression rules. Every rule is checked and all failures are reported,
//! keyed by property name.

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde::{Deserialize, Serialize};

use convoy_model::Value;

use crate::expr::{self, EvalContext};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// `int`, `float`, `bool`, `uint` or `string`
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub rule_type: String,
    #[serde(default)]
    pub required: bool,
    /// Named pattern such as `<email>`, or a raw regex
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,
    /// Boolean expression, the property value is bound to `$val()`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub rules: BTreeMap<String, Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, RuleResult>,
}

impl SchemaResult {
    fn fail(&mut self, property: &str, error: impl Into<String>) {
        self.valid = false;
        self.errors.insert(
            property.to_string(),
            RuleResult {
                valid: false,
                error: error.into(),
            },
        );
    }
}

fn named_pattern(pattern: &str) -> &str {
    match pattern {
        "<email>" => r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$",
        "<url>" => r"^https?://.*$",
        "<uuid>" => r"^[a-f\d]{8}(-[a-f\d]{4}){3}-[a-f\d]{12}$",
        "<dns-label>" => r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$",
        "<dns-name>" => r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?\.)+[a-z]{2,}$",
        "<ip4>" => r"^(\d{1,3}\.){3}\d{1,3}$",
        "<ip4-range>" => r"^(\d{1,3}\.){3}\d{1,3}-(\d{1,3}\.){3}\d{1,3}$",
        "<port>" => r"^\d{1,5}$",
        "<mac-address>" => r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$",
        "<cidr>" => r"^(\d{1,3}\.){3}\d{1,3}/\d{1,2}$",
        "<ip6>" => r"^([0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}$",
        raw => raw,
    }
}

fn type_error(rule_type: &str, raw: &str) -> Option<&'static str> {
    let ok = match rule_type {
        "int" => raw.parse::<i64>().is_ok(),
        "float" => raw.parse::<f64>().is_ok(),
        "bool" => matches!(
            raw,
            "1" | "t" | "T" | "TRUE" | "true" | "True" | "0" | "f" | "F" | "FALSE" | "false" | "False"
        ),
        "uint" => raw.parse::<u64>().is_ok(),
        "string" => true,
        _ => return Some("unknown type"),
    };
    if ok {
        return None;
    }
    Some(match rule_type {
        "int" => "property is not an int",
        "float" => "property is not a float",
        "bool" => "property is not a bool",
        _ => "property is not a uint",
    })
}

impl Schema {
    /// Check `properties` against every rule
    ///
    /// A rule that fails in more than one way reports the last failure.
    #[must_use]
    pub fn check_properties(
        &self,
        properties: &HashMap<String, Value>,
        ctx: Option<&EvalContext>,
    ) -> SchemaResult {
        let mut result = SchemaResult {
            valid: true,
            errors: BTreeMap::new(),
        };
        for (name, rule) in &self.rules {
            let value = properties.get(name);

            if let Some(v) = value
                && !rule.rule_type.is_empty()
                && let Some(err) = type_error(&rule.rule_type, &v.to_string())
            {
                result.fail(name, err);
            }

            if rule.required && value.is_none() {
                result.fail(name, "missing required property");
            }

            if let Some(v) = value
                && !rule.pattern.is_empty()
            {
                match Regex::new(named_pattern(&rule.pattern)) {
                    Ok(re) if re.is_match(&v.to_string()) => {}
                    Ok(_) => result.fail(
                        name,
                        format!("property does not match pattern: {}", rule.pattern),
                    ),
                    Err(e) => result.fail(name, format!("error matching pattern: {e}")),
                }
            }

            if let Some(v) = value
                && !rule.expression.is_empty()
            {
                let ctx = ctx.cloned().unwrap_or_default().with_value(v.clone());
                match expr::evaluate(&rule.expression, &ctx) {
                    Ok(res) if res.is_truthy_literal() => {}
                    Ok(res) if res.as_bool().is_none() => {
                        result.fail(name, "expression does not evaluate to boolean");
                    }
                    Ok(_) => result.fail(
                        name,
                        format!("property does not match expression: {}", rule.expression),
                    ),
                    Err(e) => result.fail(name, format!("error evaluating expression: {e}")),
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(rules: &[(&str, Rule)]) -> Schema {
        Schema {
            rules: rules
                .iter()
                .map(|(k, r)| ((*k).to_string(), r.clone()))
                .collect(),
        }
    }

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
            .collect()
    }

    fn typed(t: &str) -> Rule {
        Rule {
            rule_type: t.to_string(),
            ..Rule::default()
        }
    }

    fn pattern(p: &str) -> Rule {
        Rule {
            pattern: p.to_string(),
            ..Rule::default()
        }
    }

    #[test]
    fn test_types() {
        let s = schema(&[
            ("a", typed("int")),
            ("b", typed("uint")),
            ("c", typed("float")),
            ("d", typed("bool")),
            ("e", typed("string")),
        ]);
        let ok = s.check_properties(
            &props(&[("a", "-3"), ("b", "7"), ("c", "1.5"), ("d", "true"), ("e", "x")]),
            None,
        );
        assert!(ok.valid, "{:?}", ok.errors);

        let bad = s.check_properties(
            &props(&[("a", "x"), ("b", "-1"), ("c", "y"), ("d", "yes")]),
            None,
        );
        assert!(!bad.valid);
        assert_eq!(bad.errors["a"].error, "property is not an int");
        assert_eq!(bad.errors["b"].error, "property is not a uint");
        assert_eq!(bad.errors["c"].error, "property is not a float");
        assert_eq!(bad.errors["d"].error, "property is not a bool");
        assert!(!bad.errors.contains_key("e"));
    }

    #[test]
    fn test_numbers_check_by_display() {
        let s = schema(&[("port", typed("int"))]);
        let mut p = HashMap::new();
        p.insert("port".to_string(), Value::Number(8080.0));
        assert!(s.check_properties(&p, None).valid);
    }

    #[test]
    fn test_unknown_type_and_required() {
        let s = schema(&[
            ("a", typed("date")),
            (
                "b",
                Rule {
                    required: true,
                    ..Rule::default()
                },
            ),
        ]);
        let r = s.check_properties(&props(&[("a", "x")]), None);
        assert_eq!(r.errors["a"].error, "unknown type");
        assert_eq!(r.errors["b"].error, "missing required property");
    }

    #[test]
    fn test_named_patterns() {
        let cases = [
            ("<email>", "dev@example.com", "not-an-email"),
            ("<url>", "https://example.com", "ftp://example.com"),
            ("<uuid>", "123e4567-e89b-12d3-a456-426614174000", "123e4567"),
            ("<dns-label>", "web-01", "-web"),
            ("<dns-name>", "api.example.com", "localhost"),
            ("<ip4>", "10.0.0.1", "10.0.1"),
            ("<port>", "8080", "80a"),
            ("<mac-address>", "00:1A:2b:3C:4d:5E", "00:1A:2b"),
            ("<cidr>", "10.0.0.0/24", "10.0.0.0"),
        ];
        for (p, good, bad) in cases {
            let s = schema(&[("v", pattern(p))]);
            assert!(s.check_properties(&props(&[("v", good)]), None).valid, "{p} {good}");
            let r = s.check_properties(&props(&[("v", bad)]), None);
            assert_eq!(
                r.errors["v"].error,
                format!("property does not match pattern: {p}"),
                "{p} {bad}"
            );
        }
    }

    #[test]
    fn test_raw_regex_pattern() {
        let s = schema(&[("v", pattern("^v[0-9]+$"))]);
        assert!(s.check_properties(&props(&[("v", "v12")]), None).valid);
        assert!(!s.check_properties(&props(&[("v", "12")]), None).valid);

        let broken = schema(&[("v", pattern("("))]);
        let r = broken.check_properties(&props(&[("v", "x")]), None);
        assert!(r.errors["v"].error.starts_with("error matching pattern"));
    }

    #[test]
    fn test_expression_rules() {
        let rule = |e: &str| Rule {
            expression: e.to_string(),
            ..Rule::default()
        };
        let s = schema(&[
            ("replicas", rule("$between($val(), 1, 5)")),
            ("name", rule("$val()")),
            ("zone", rule("$in($val(), a, b)")),
            ("ratio", rule("$val()/0")),
        ]);
        let r = s.check_properties(
            &props(&[("replicas", "3"), ("name", "web"), ("zone", "c"), ("ratio", "1")]),
            None,
        );
        assert!(!r.errors.contains_key("replicas"));
        assert_eq!(r.errors["name"].error, "expression does not evaluate to boolean");
        assert_eq!(
            r.errors["zone"].error,
            "property does not match expression: $in($val(), a, b)"
        );
        assert!(r.errors["ratio"].error.starts_with("error evaluating expression"));
    }

    #[test]
    fn test_expression_sees_context() {
        let ctx = EvalContext::with_properties(HashMap::from([(
            "max".to_string(),
            "4".to_string(),
        )]));
        let s = schema(&[(
            "cpus",
            Rule {
                expression: "$le($val(), $property(max))".to_string(),
                ..Rule::default()
            },
        )]);
        assert!(s.check_properties(&props(&[("cpus", "2")]), Some(&ctx)).valid);
        assert!(!s.check_properties(&props(&[("cpus", "8")]), Some(&ctx)).valid);
    }

    #[test]
    fn test_deserialize() {
        let s: Schema = serde_json::from_str(
            r#"{"rules":{"email":{"type":"string","required":true,"pattern":"<email>"}}}"#,
        )
        .unwrap();
        assert_eq!(s.rules["email"].rule_type, "string");
        assert!(s.rules["email"].required);
    }
}

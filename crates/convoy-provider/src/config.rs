//! Flat-map provider configuration helpers

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use convoy_model::{DeploymentSpec, Value};

use crate::error::ProviderError;

/// Interpret a raw configuration string
///
/// `$true`/`$false` become booleans, `#123` an integer, `{..}`/`[..]` JSON,
/// and `$NAME` the value of the environment variable `NAME` (empty when
/// unset). Anything else is returned as a string.
pub fn parse_value(raw: &str) -> Result<Value, ProviderError> {
    match raw {
        "$true" => return Ok(Value::Bool(true)),
        "$false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Some(num) = raw.strip_prefix('#') {
        let n: i64 = num
            .parse()
            .map_err(|_| ProviderError::Config(format!("'{raw}' is not an integer")))?;
        return Ok(Value::from(n));
    }
    if (raw.starts_with('{') && raw.ends_with('}')) || (raw.starts_with('[') && raw.ends_with(']'))
    {
        let json: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| ProviderError::Config(format!("invalid JSON value '{raw}': {e}")))?;
        return Ok(Value::from(json));
    }
    if let Some(var) = raw.strip_prefix('$') {
        return Ok(Value::String(std::env::var(var).unwrap_or_default()));
    }
    Ok(Value::String(raw.to_string()))
}

/// Read typed keys out of a flat provider configuration map
///
/// Errors name both the provider and the offending key.
pub struct MapConfig<'a> {
    provider: &'static str,
    properties: &'a HashMap<String, String>,
}

impl<'a> MapConfig<'a> {
    #[must_use]
    pub fn new(provider: &'static str, properties: &'a HashMap<String, String>) -> Self {
        Self {
            provider,
            properties,
        }
    }

    /// Key that must be present
    pub fn required(&self, key: &str) -> Result<String, ProviderError> {
        self.properties.get(key).cloned().ok_or_else(|| {
            ProviderError::Config(format!("'{key}' is missing in {} provider config", self.provider))
        })
    }

    /// Key that must be present and non-empty
    pub fn required_non_empty(&self, key: &str) -> Result<String, ProviderError> {
        let v = self.required(key)?;
        if v.is_empty() {
            return Err(ProviderError::Config(format!(
                "'{key}' is empty in {} provider config",
                self.provider
            )));
        }
        Ok(v)
    }

    #[must_use]
    pub fn optional(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }

    #[must_use]
    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Integer key with a default, a non-integer value is an error
    pub fn int_or(&self, key: &str, default: i64) -> Result<i64, ProviderError> {
        match self.properties.get(key) {
            Some(v) => v.trim().parse().map_err(|_| {
                ProviderError::Config(format!(
                    "'{key}' is not an integer in {} provider config",
                    self.provider
                ))
            }),
            None => Ok(default),
        }
    }

    /// Boolean key, only the literal `true` enables it
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.properties.get(key).is_some_and(|v| v == "true")
    }

    /// Key run through [`parse_value`] and rendered back to a string
    pub fn resolved(&self, key: &str) -> Result<Option<String>, ProviderError> {
        self.properties
            .get(key)
            .map(|v| parse_value(v).map(|p| p.to_string()))
            .transpose()
    }
}

/// Deserialize a structured configuration into a provider config struct
pub fn from_json<T: DeserializeOwned>(
    provider: &'static str,
    config: serde_json::Value,
) -> Result<T, ProviderError> {
    serde_json::from_value(config)
        .map_err(|e| ProviderError::Config(format!("expected {provider} provider config: {e}")))
}

/// Substitute `$instance()`, `$solution()` and `$target()` in a property value
#[must_use]
pub fn inject_values(raw: &str, deployment: &DeploymentSpec) -> String {
    if !raw.contains('$') {
        return raw.to_string();
    }
    raw.replace("$instance()", &deployment.instance.name)
        .replace("$solution()", &deployment.instance.solution)
        .replace("$target()", &deployment.active_target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("$true").unwrap(), Value::Bool(true));
        assert_eq!(parse_value("$false").unwrap(), Value::Bool(false));
        assert_eq!(parse_value("#42").unwrap(), Value::Number(42.0));
        assert!(matches!(parse_value("#x"), Err(ProviderError::Config(_))));
        assert_eq!(parse_value("plain").unwrap(), Value::from("plain"));
        assert_eq!(
            parse_value("$CONVOY_TEST_SURELY_UNSET_VAR").unwrap(),
            Value::from("")
        );
        let Value::Map(m) = parse_value(r#"{"a": 1}"#).unwrap() else {
            panic!("expected map");
        };
        assert_eq!(m["a"], Value::Number(1.0));
    }

    #[test]
    fn test_map_config() {
        let mut props = HashMap::new();
        props.insert("baseUrl".to_string(), "http://x".to_string());
        props.insert("user".to_string(), String::new());
        props.insert("wait.count".to_string(), "abc".to_string());
        props.insert("wait.interval".to_string(), "5".to_string());
        let cfg = MapConfig::new("test", &props);

        assert_eq!(cfg.required("baseUrl").unwrap(), "http://x");
        assert!(cfg.required("password").is_err());
        let err = cfg.required_non_empty("user").unwrap_err();
        assert!(err.to_string().contains("'user'"));
        assert!(cfg.int_or("wait.count", 1).is_err());
        assert_eq!(cfg.int_or("wait.interval", 1).unwrap(), 5);
        assert_eq!(cfg.int_or("wait.missing", 3).unwrap(), 3);
        assert!(!cfg.flag("useTLS"));
    }

    #[test]
    fn test_inject_values() {
        let mut deployment = DeploymentSpec::default();
        deployment.instance.name = "inst-1".to_string();
        deployment.active_target = "edge".to_string();
        assert_eq!(
            inject_values("http://$target()/apps/$instance()", &deployment),
            "http://edge/apps/inst-1"
        );
    }
}

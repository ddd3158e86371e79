//! Message bus envelopes for the async provider binding
//!
//! The metadata keys and the call-context vocabulary are shared with the
//! remote agent and must not change.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::component::ComponentSpec;
use crate::deployment::{ComponentStep, DeploymentSpec, DeploymentStep};
use crate::error::ModelError;
use crate::result::{ResultMap, State};

pub const CALL_CONTEXT_KEY: &str = "call-context";
pub const REQUEST_ID_KEY: &str = "request-id";
pub const ACTIVE_TARGET_KEY: &str = "active-target";

/// Route used for instance operations
pub const INSTANCES_ROUTE: &str = "instances";
pub const NEEDS_UPDATE_ROUTE: &str = "needsupdate";
pub const NEEDS_REMOVE_ROUTE: &str = "needsremove";

/// Which provider operation an envelope belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallContextKind {
    #[serde(rename = "TargetProvider-Get")]
    Get,
    #[serde(rename = "TargetProvider-Apply")]
    Apply,
    #[serde(rename = "TargetProvider-Remove")]
    Remove,
    #[serde(rename = "TargetProvider-NeedsUpdate")]
    NeedsUpdate,
    #[serde(rename = "TargetProvider-NeedsRemove")]
    NeedsRemove,
}

impl CallContextKind {
    pub const ALL: [CallContextKind; 5] = [
        CallContextKind::Get,
        CallContextKind::Apply,
        CallContextKind::Remove,
        CallContextKind::NeedsUpdate,
        CallContextKind::NeedsRemove,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CallContextKind::Get => "TargetProvider-Get",
            CallContextKind::Apply => "TargetProvider-Apply",
            CallContextKind::Remove => "TargetProvider-Remove",
            CallContextKind::NeedsUpdate => "TargetProvider-NeedsUpdate",
            CallContextKind::NeedsRemove => "TargetProvider-NeedsRemove",
        }
    }
}

impl fmt::Display for CallContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallContextKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ModelError::Validation(format!("unknown call context '{s}'")))
    }
}

/// Outbound request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusRequest {
    pub route: String,
    pub method: String,
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl BusRequest {
    /// Build a request tagged with its call context and request id
    pub fn new(
        kind: CallContextKind,
        route: impl Into<String>,
        method: impl Into<String>,
        body: serde_json::Value,
        request_id: impl Into<String>,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(CALL_CONTEXT_KEY.to_string(), kind.as_str().to_string());
        metadata.insert(REQUEST_ID_KEY.to_string(), request_id.into());
        Self {
            route: route.into(),
            method: method.into(),
            body,
            metadata,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.metadata.get(REQUEST_ID_KEY).map(String::as_str)
    }

    #[must_use]
    pub fn call_context(&self) -> Option<CallContextKind> {
        self.metadata
            .get(CALL_CONTEXT_KEY)
            .and_then(|s| s.parse().ok())
    }
}

/// Reply envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusResponse {
    pub state: State,
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl BusResponse {
    /// Successful reply answering `request`
    #[must_use]
    pub fn ok(request: &BusRequest, body: serde_json::Value) -> Self {
        Self::reply(request, State::Ok, body)
    }

    /// Failed reply answering `request`, the message travels as the body
    #[must_use]
    pub fn error(request: &BusRequest, state: State, message: impl Into<String>) -> Self {
        Self::reply(request, state, serde_json::Value::String(message.into()))
    }

    /// Failed apply reply carrying the results the agent reached before failing
    #[must_use]
    pub fn apply_error(
        request: &BusRequest,
        state: State,
        results: ResultMap,
        message: impl Into<String>,
    ) -> Self {
        let body = ApplyErrorBody {
            results,
            message: message.into(),
        };
        let body = serde_json::to_value(&body)
            .unwrap_or_else(|e| serde_json::Value::String(e.to_string()));
        Self::reply(request, state, body)
    }

    fn reply(request: &BusRequest, state: State, body: serde_json::Value) -> Self {
        let metadata = [CALL_CONTEXT_KEY, REQUEST_ID_KEY]
            .into_iter()
            .filter_map(|k| request.metadata.get(k).map(|v| (k.to_string(), v.clone())))
            .collect();
        Self {
            state,
            body,
            metadata,
        }
    }

    /// `OK` and `Accepted` both count as success
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self.state, State::Ok | State::Accepted)
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.metadata.get(REQUEST_ID_KEY).map(String::as_str)
    }

    #[must_use]
    pub fn call_context(&self) -> Option<CallContextKind> {
        self.metadata
            .get(CALL_CONTEXT_KEY)
            .and_then(|s| s.parse().ok())
    }

    /// Human readable failure message carried in the body
    #[must_use]
    pub fn message(&self) -> String {
        match &self.body {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            serde_json::Value::Object(map) => match map.get("message") {
                Some(serde_json::Value::String(s)) => s.clone(),
                _ => self.body.to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Partial results of a failed apply, if the agent sent any
    #[must_use]
    pub fn partial_results(&self) -> Option<ResultMap> {
        serde_json::from_value::<ApplyErrorBody>(self.body.clone())
            .ok()
            .map(|b| b.results)
            .filter(|r| !r.is_empty())
    }
}

/// Body of a failed apply reply, on the bus and from a REST agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyErrorBody {
    #[serde(default)]
    pub results: ResultMap,
    #[serde(default)]
    pub message: String,
}

/// Body of a `Get` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPayload {
    pub deployment: DeploymentSpec,
    #[serde(default)]
    pub references: Vec<ComponentStep>,
}

/// Body of an `Apply` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPayload {
    pub deployment: DeploymentSpec,
    pub step: DeploymentStep,
    #[serde(default)]
    pub is_dry_run: bool,
}

/// Body of a `Remove` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovePayload {
    pub deployment: DeploymentSpec,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
}

/// Body of `NeedsUpdate` and `NeedsRemove` requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparePayload {
    pub desired: Vec<ComponentSpec>,
    pub current: Vec<ComponentSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ComponentResultSpec;

    #[test]
    fn test_call_context_vocabulary() {
        let wire: Vec<&str> = CallContextKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            wire,
            vec![
                "TargetProvider-Get",
                "TargetProvider-Apply",
                "TargetProvider-Remove",
                "TargetProvider-NeedsUpdate",
                "TargetProvider-NeedsRemove",
            ]
        );
        for kind in CallContextKind::ALL {
            assert_eq!(kind.as_str().parse::<CallContextKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.as_str().to_string())
            );
        }
        assert!("TargetProvider-Other".parse::<CallContextKind>().is_err());
    }

    #[test]
    fn test_response_echoes_correlation_metadata() {
        let req = BusRequest::new(
            CallContextKind::Get,
            INSTANCES_ROUTE,
            "GET",
            serde_json::Value::Null,
            "req-1",
        )
        .with_metadata(ACTIVE_TARGET_KEY, "edge");
        assert_eq!(req.call_context(), Some(CallContextKind::Get));

        let resp = BusResponse::error(&req, State::NotFound, "nothing here");
        assert_eq!(resp.request_id(), Some("req-1"));
        assert_eq!(resp.call_context(), Some(CallContextKind::Get));
        assert!(!resp.metadata.contains_key(ACTIVE_TARGET_KEY));
        assert!(!resp.is_ok());
        assert_eq!(resp.message(), "nothing here");
        assert!(resp.partial_results().is_none());
    }

    #[test]
    fn test_apply_error_carries_partial_results() {
        let req = BusRequest::new(
            CallContextKind::Apply,
            INSTANCES_ROUTE,
            "POST",
            serde_json::Value::Null,
            "req-2",
        );
        let mut results = ResultMap::new();
        results.insert("a".into(), ComponentResultSpec::new(State::Updated, ""));
        results.insert("b".into(), ComponentResultSpec::new(State::UpdateFailed, "boom"));

        let resp = BusResponse::apply_error(&req, State::UpdateFailed, results.clone(), "b: boom");
        assert_eq!(resp.message(), "b: boom");
        assert_eq!(resp.partial_results(), Some(results));
        assert_eq!(resp.request_id(), Some("req-2"));
    }
}

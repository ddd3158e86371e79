//! HTTP target provider
//!
//! Each updated component describes one HTTP call through its `http.url`,
//! `http.method` and `http.body` properties. Deletions are not forwarded.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use convoy_model::{
    ComponentAction, ComponentResultSpec, ComponentSpec, ComponentStep, DeploymentSpec,
    DeploymentStep, ResultMap, State, ValidationRule,
};

use crate::apply::{fail_component, validate_step};
use crate::config::{MapConfig, from_json, inject_values};
use crate::context::CallContext;
use crate::error::{ApplyFailure, ProviderError};
use crate::traits::TargetProvider;

pub const PROVIDER_TYPE: &str = "providers.target.http";

/// HTTP provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub name: String,
}

impl HttpConfig {
    pub fn from_map(properties: &HashMap<String, String>) -> Result<Self, ProviderError> {
        Ok(Self {
            name: MapConfig::new("http", properties).string_or("name", ""),
        })
    }
}

/// Provider issuing one HTTP request per updated component
pub struct HttpTargetProvider {
    config: Mutex<HttpConfig>,
    client: reqwest::Client,
}

impl HttpTargetProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            config: Mutex::new(HttpConfig::default()),
            client,
        }
    }

    fn set_config(&self, config: HttpConfig) {
        info!(name = %config.name, "http provider initialized");
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
    }

    async fn send(
        &self,
        ctx: &CallContext,
        deployment: &DeploymentSpec,
        component: &ComponentSpec,
    ) -> Result<(), String> {
        let url = inject_values(&component.property_string("http.url"), deployment);
        if url.is_empty() {
            return Err("component doesn't have a http.url property".to_string());
        }
        let method = component.property_string("http.method");
        let method = if method.is_empty() {
            Method::POST
        } else {
            Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|e| e.to_string())?
        };
        let body = inject_values(&component.property_string("http.body"), deployment);

        debug!(component = %component.name, %method, %url, "sending request");

        let request = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json; charset=UTF-8")
            .body(body)
            .send();
        let response = ctx
            .run(async { request.await.map_err(ProviderError::from) })
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP request didn't respond 2xx: {status}"));
        }
        Ok(())
    }
}

impl Default for HttpTargetProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetProvider for HttpTargetProvider {
    fn provider_type(&self) -> &'static str {
        PROVIDER_TYPE
    }

    async fn init(&self, config: serde_json::Value) -> Result<(), ProviderError> {
        self.set_config(from_json("http", config)?);
        Ok(())
    }

    async fn init_with_map(
        &self,
        properties: &HashMap<String, String>,
    ) -> Result<(), ProviderError> {
        self.set_config(HttpConfig::from_map(properties)?);
        Ok(())
    }

    fn validation_rule(&self) -> ValidationRule {
        ValidationRule {
            required_properties: vec!["http.url".to_string()],
            optional_properties: vec!["http.method".to_string(), "http.body".to_string()],
            ..ValidationRule::default()
        }
    }

    async fn get(
        &self,
        _ctx: &CallContext,
        deployment: &DeploymentSpec,
        _references: &[ComponentStep],
    ) -> Result<Vec<ComponentSpec>, ProviderError> {
        debug!(instance = %deployment.instance.name, "http targets report no state");
        Ok(Vec::new())
    }

    #[instrument(skip(self, ctx, deployment, step), fields(target = %step.target))]
    async fn apply(
        &self,
        ctx: &CallContext,
        deployment: &DeploymentSpec,
        step: &DeploymentStep,
        dry_run: bool,
    ) -> Result<Option<ResultMap>, ApplyFailure> {
        validate_step(&self.validation_rule(), step)?;
        if dry_run {
            return Ok(None);
        }

        let mut results = step.prepare_result_map();
        for item in &step.components {
            if item.action != ComponentAction::Update {
                continue;
            }
            let name = &item.component.name;
            if let Err(message) = self.send(ctx, deployment, &item.component).await {
                error!(component = %name, error = %message, "http apply failed");
                return Err(fail_component(results, name, State::UpdateFailed, message));
            }
            results.insert(name.clone(), ComponentResultSpec::new(State::Updated, ""));
        }
        Ok(Some(results))
    }
}

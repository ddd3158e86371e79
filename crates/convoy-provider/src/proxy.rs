//! Proxy target provider
//!
//! Relays the provider contract to a remote REST endpoint. The remote side
//! serves `instances` with `GET` (current state), `POST` (updates) and
//! `DELETE` (deletions), using the same payloads as the bus binding.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use url::Url;

use convoy_model::bus::INSTANCES_ROUTE;
use convoy_model::{
    ApplyErrorBody, ApplyPayload, ComponentAction, ComponentSpec, ComponentStep, DeploymentSpec, DeploymentStep,
    GetPayload, ResultMap, State, ValidationRule,
};

use crate::apply::{merge_remote_failure, merge_remote_success, validate_step};
use crate::config::{MapConfig, from_json};
use crate::context::CallContext;
use crate::error::{ApplyFailure, ProviderError};
use crate::traits::TargetProvider;

pub const PROVIDER_TYPE: &str = "providers.target.proxy";

/// Proxy provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "serverUrl")]
    pub server_url: String,
}

impl ProxyConfig {
    pub fn from_map(properties: &HashMap<String, String>) -> Result<Self, ProviderError> {
        let cfg = MapConfig::new("proxy", properties);
        Ok(Self {
            name: cfg.resolved("name")?.unwrap_or_default(),
            server_url: cfg
                .resolved("serverUrl")?
                .ok_or_else(|| ProviderError::Config("proxy server url is not set".to_string()))?,
        })
    }

    fn endpoint(&self, route: &str) -> Result<Url, ProviderError> {
        let mut base = self.server_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base)
            .and_then(|u| u.join(route))
            .map_err(|e| ProviderError::Config(format!("invalid serverUrl '{}': {e}", self.server_url)))
    }
}

/// Provider relaying calls to a remote REST agent
pub struct ProxyTargetProvider {
    config: Mutex<Option<ProxyConfig>>,
    client: reqwest::Client,
}

impl ProxyTargetProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Mutex::new(None),
            client: reqwest::Client::new(),
        }
    }

    fn set_config(&self, config: ProxyConfig) -> Result<(), ProviderError> {
        config.endpoint(INSTANCES_ROUTE)?;
        info!(server = %config.server_url, "proxy provider initialized");
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config);
        Ok(())
    }

    fn config(&self) -> Result<ProxyConfig, ProviderError> {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ProviderError::NotInitialized)
    }

    /// Send one request, returning the status and raw body
    async fn exchange<B: Serialize + Sync>(
        &self,
        ctx: &CallContext,
        method: Method,
        body: &B,
    ) -> Result<(StatusCode, String), ProviderError> {
        let url = self.config()?.endpoint(INSTANCES_ROUTE)?;
        let request = self.client.request(method, url).json(body).send();
        ctx.run(async {
            let response = request.await?;
            let status = response.status();
            Ok((status, response.text().await?))
        })
        .await
    }

    async fn call<B: Serialize + Sync>(
        &self,
        ctx: &CallContext,
        method: Method,
        body: &B,
    ) -> Result<serde_json::Value, ProviderError> {
        let (status, text) = self.exchange(ctx, method, body).await?;
        if status.as_u16() >= 300 {
            return Err(remote_error(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn apply_phase(
        &self,
        ctx: &CallContext,
        deployment: &DeploymentSpec,
        step: &DeploymentStep,
        action: ComponentAction,
        results: &mut ResultMap,
    ) -> Result<(), ProviderError> {
        let (method, done, failed) = match action {
            ComponentAction::Update => (Method::POST, State::Updated, State::UpdateFailed),
            ComponentAction::Delete => (Method::DELETE, State::Deleted, State::DeleteFailed),
        };
        let phase = DeploymentStep {
            components: step
                .components
                .iter()
                .filter(|c| c.action == action)
                .cloned()
                .collect(),
            ..step.clone()
        };
        if phase.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = phase.components.iter().map(|c| c.component.name.clone()).collect();
        let payload = ApplyPayload {
            deployment: deployment.clone(),
            step: phase,
            is_dry_run: false,
        };
        let (status, text) = match self.exchange(ctx, method, &payload).await {
            Ok(reply) => reply,
            Err(e) => {
                merge_remote_failure(results, &names, failed, None, &e);
                return Err(e);
            }
        };
        if status.as_u16() >= 300 {
            let error = remote_error(status, &text);
            let partial = serde_json::from_str::<ApplyErrorBody>(&text)
                .ok()
                .map(|body| body.results);
            merge_remote_failure(results, &names, failed, partial, &error);
            return Err(error);
        }
        let remote = serde_json::from_str::<ResultMap>(&text).ok();
        merge_remote_success(results, &names, done, remote)
    }
}

/// Error for a non-success reply, preferring the agent's own message
fn remote_error(status: StatusCode, text: &str) -> ProviderError {
    let detail = serde_json::from_str::<ApplyErrorBody>(text)
        .ok()
        .map_or_else(|| text.to_string(), |body| body.message);
    ProviderError::Http(format!("failed to invoke remote API ({status}): {detail}"))
}

impl Default for ProxyTargetProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetProvider for ProxyTargetProvider {
    fn provider_type(&self) -> &'static str {
        PROVIDER_TYPE
    }

    async fn init(&self, config: serde_json::Value) -> Result<(), ProviderError> {
        self.set_config(from_json("proxy", config)?)
    }

    async fn init_with_map(
        &self,
        properties: &HashMap<String, String>,
    ) -> Result<(), ProviderError> {
        self.set_config(ProxyConfig::from_map(properties)?)
    }

    fn validation_rule(&self) -> ValidationRule {
        ValidationRule::default()
    }

    #[instrument(skip(self, ctx, deployment, references), fields(instance = %deployment.instance.name))]
    async fn get(
        &self,
        ctx: &CallContext,
        deployment: &DeploymentSpec,
        references: &[ComponentStep],
    ) -> Result<Vec<ComponentSpec>, ProviderError> {
        let payload = GetPayload {
            deployment: deployment.clone(),
            references: references.to_vec(),
        };
        let body = self.call(ctx, Method::GET, &payload).await?;
        if body.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(body)?)
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
        for action in [ComponentAction::Update, ComponentAction::Delete] {
            if let Err(e) = self
                .apply_phase(ctx, deployment, step, action, &mut results)
                .await
            {
                error!(error = %e, ?action, "proxy apply failed");
                return Err(ApplyFailure::new(results, e));
            }
        }
        Ok(Some(results))
    }
}

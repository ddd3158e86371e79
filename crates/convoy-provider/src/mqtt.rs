//! Message-bus target provider
//!
//! Relays `get`, `apply` and `remove` to a remote agent over a
//! request/response topic pair. Every request carries a `call-context` and a
//! `request-id`; replies are matched back to the waiting call by request id,
//! or by call context for agents that do not echo the id.
//!
//! The bus is either injected or, by default, an MQTT broker connection made
//! from `brokerAddress` and the credentials at init.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use convoy_model::bus::{ACTIVE_TARGET_KEY, INSTANCES_ROUTE, NEEDS_REMOVE_ROUTE, NEEDS_UPDATE_ROUTE};
use convoy_model::{
    ApplyPayload, BusRequest, BusResponse, CallContextKind, ComparePayload, ComponentAction,
    ComponentSpec, ComponentStep, DeploymentSpec, DeploymentStep, GetPayload, RemovePayload,
    ResultMap, State, ValidationRule,
};

use crate::apply::{merge_remote_failure, merge_remote_success, validate_step};
use crate::broker::BrokerBus;
use crate::bus::MessageBus;
use crate::config::{MapConfig, from_json};
use crate::context::CallContext;
use crate::error::{ApplyFailure, ProviderError};
use crate::traits::{LegacyComparer, TargetProvider};

pub const PROVIDER_TYPE: &str = "providers.target.mqtt";

const DEFAULT_TIMEOUT_SECONDS: i64 = 8;
const DEFAULT_KEEP_ALIVE_SECONDS: i64 = 2;
const DEFAULT_PING_TIMEOUT_SECONDS: i64 = 1;

/// Bus provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttConfig {
    #[serde(default)]
    pub name: String,
    pub broker_address: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub request_topic: String,
    pub response_topic: String,
    #[serde(default)]
    pub timeout_seconds: i64,
    #[serde(default)]
    pub keep_alive_seconds: i64,
    #[serde(default)]
    pub ping_timeout_seconds: i64,
    #[serde(default, rename = "useTLS")]
    pub use_tls: bool,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl MqttConfig {
    pub fn from_map(properties: &HashMap<String, String>) -> Result<Self, ProviderError> {
        let cfg = MapConfig::new("mqtt", properties);
        let config = Self {
            name: cfg.string_or("name", ""),
            broker_address: cfg.required("brokerAddress")?,
            client_id: cfg.required("clientID")?,
            request_topic: cfg.required("requestTopic")?,
            response_topic: cfg.required("responseTopic")?,
            timeout_seconds: cfg.int_or("timeoutSeconds", DEFAULT_TIMEOUT_SECONDS)?,
            keep_alive_seconds: cfg.int_or("keepAliveSeconds", DEFAULT_KEEP_ALIVE_SECONDS)?,
            ping_timeout_seconds: cfg.int_or("pingTimeoutSeconds", DEFAULT_PING_TIMEOUT_SECONDS)?,
            use_tls: cfg.flag("useTLS"),
            insecure_skip_verify: cfg.flag("insecureSkipVerify"),
            username: cfg.string_or("username", ""),
            password: cfg.string_or("password", ""),
        };
        Ok(config.normalized())
    }

    /// Replace unset or non-positive durations with their defaults
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.timeout_seconds <= 0 {
            self.timeout_seconds = DEFAULT_TIMEOUT_SECONDS;
        }
        if self.keep_alive_seconds <= 0 {
            self.keep_alive_seconds = DEFAULT_KEEP_ALIVE_SECONDS;
        }
        if self.ping_timeout_seconds <= 0 {
            self.ping_timeout_seconds = DEFAULT_PING_TIMEOUT_SECONDS;
        }
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unsigned_abs())
    }
}

/// One contract operation as it travels on the bus
struct Operation {
    kind: CallContextKind,
    route: &'static str,
    method: &'static str,
    /// Name used in timeout errors
    name: &'static str,
}

const GET: Operation = Operation {
    kind: CallContextKind::Get,
    route: INSTANCES_ROUTE,
    method: "GET",
    name: "Get()",
};
const APPLY_UPDATE: Operation = Operation {
    kind: CallContextKind::Apply,
    route: INSTANCES_ROUTE,
    method: "POST",
    name: "Apply()-Update",
};
const APPLY_DELETE: Operation = Operation {
    kind: CallContextKind::Apply,
    route: INSTANCES_ROUTE,
    method: "DELETE",
    name: "Apply()-Delete",
};
const REMOVE: Operation = Operation {
    kind: CallContextKind::Remove,
    route: INSTANCES_ROUTE,
    method: "DELETE",
    name: "Remove()",
};
const NEEDS_UPDATE: Operation = Operation {
    kind: CallContextKind::NeedsUpdate,
    route: NEEDS_UPDATE_ROUTE,
    method: "POST",
    name: "NeedsUpdate()",
};
const NEEDS_REMOVE: Operation = Operation {
    kind: CallContextKind::NeedsRemove,
    route: NEEDS_REMOVE_ROUTE,
    method: "POST",
    name: "NeedsRemove()",
};

struct Pending {
    id: String,
    kind: CallContextKind,
    tx: oneshot::Sender<BusResponse>,
}

#[derive(Default)]
struct PendingTable {
    entries: Mutex<VecDeque<Pending>>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Pending>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: String, kind: CallContextKind) -> oneshot::Receiver<BusResponse> {
        let (tx, rx) = oneshot::channel();
        self.lock().push_back(Pending { id, kind, tx });
        rx
    }

    fn forget(&self, id: &str) {
        self.lock().retain(|p| p.id != id);
    }

    /// Hand `response` to the call it answers
    fn resolve(&self, response: BusResponse) {
        let mut entries = self.lock();
        let by_id = response
            .request_id()
            .and_then(|id| entries.iter().position(|p| p.id == id));
        let index = by_id.or_else(|| {
            let kind = response.call_context()?;
            entries.iter().position(|p| p.kind == kind)
        });
        match index.and_then(|i| entries.remove(i)) {
            Some(pending) => {
                // The caller may have given up already
                let _ = pending.tx.send(response);
            }
            None => trace!(
                request_id = response.request_id().unwrap_or_default(),
                "dropping unmatched response"
            ),
        }
    }
}

/// Removes a pending entry however the wait ends
struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.forget(&self.id);
    }
}

struct Connection {
    config: MqttConfig,
    bus: Arc<dyn MessageBus>,
    pending: Arc<PendingTable>,
    listener: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Provider speaking the target contract over a [`MessageBus`]
pub struct MqttTargetProvider {
    bus: Option<Arc<dyn MessageBus>>,
    connection: OnceCell<Connection>,
}

impl MqttTargetProvider {
    /// Provider on an already connected bus
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus: Some(bus),
            connection: OnceCell::new(),
        }
    }

    /// Provider that connects to the configured broker at init
    #[must_use]
    pub fn broker() -> Self {
        Self {
            bus: None,
            connection: OnceCell::new(),
        }
    }

    /// Connect once; later calls keep the first configuration
    async fn connect(&self, config: MqttConfig) -> Result<(), ProviderError> {
        if self.connection.initialized() {
            debug!("mqtt provider already connected");
            return Ok(());
        }
        self.connection
            .get_or_try_init(|| async move {
                let config = config.normalized();
                let bus: Arc<dyn MessageBus> = match &self.bus {
                    Some(bus) => Arc::clone(bus),
                    None => Arc::new(BrokerBus::connect(&config).await?),
                };
                let mut responses = bus.subscribe(&config.response_topic).await?;
                let pending = Arc::new(PendingTable::default());
                let table = Arc::clone(&pending);
                let topic = config.response_topic.clone();
                let listener = tokio::spawn(async move {
                    while let Some(payload) = responses.next().await {
                        match serde_json::from_slice::<BusResponse>(&payload) {
                            Ok(response) => table.resolve(response),
                            Err(e) => warn!(topic = %topic, error = %e, "malformed bus response"),
                        }
                    }
                    debug!(topic = %topic, "response subscription closed");
                });
                info!(
                    broker = %config.broker_address,
                    client_id = %config.client_id,
                    request_topic = %config.request_topic,
                    response_topic = %config.response_topic,
                    "mqtt provider connected"
                );
                Ok::<_, ProviderError>(Connection {
                    config,
                    bus,
                    pending,
                    listener,
                })
            })
            .await?;
        Ok(())
    }

    fn connection(&self) -> Result<&Connection, ProviderError> {
        self.connection.get().ok_or(ProviderError::NotInitialized)
    }

    /// One request/response round trip, failing on a non-success reply
    async fn call(
        &self,
        ctx: &CallContext,
        active_target: &str,
        op: &Operation,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let response = self.exchange(ctx, active_target, op, body).await?;
        if !response.is_ok() {
            return Err(remote_error(&response));
        }
        Ok(response.body)
    }

    /// Publish a request and wait for its reply, whatever its state
    async fn exchange(
        &self,
        ctx: &CallContext,
        active_target: &str,
        op: &Operation,
        body: serde_json::Value,
    ) -> Result<BusResponse, ProviderError> {
        ctx.check()?;
        let conn = self.connection()?;
        let id = Uuid::new_v4().to_string();
        let rx = conn.pending.register(id.clone(), op.kind);
        let _guard = PendingGuard {
            table: &conn.pending,
            id: id.clone(),
        };

        let request = BusRequest::new(op.kind, op.route, op.method, body, id.as_str())
            .with_metadata(ACTIVE_TARGET_KEY, active_target);
        let payload = serde_json::to_vec(&request)?;
        conn.bus
            .publish(&conn.config.request_topic, payload)
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        trace!(request_id = %id, kind = %op.kind, "request published");

        tokio::select! {
            reply = rx => reply.map_err(|_| ProviderError::Transport("response channel closed".to_string())),
            () = tokio::time::sleep(conn.config.timeout()) => {
                Err(ProviderError::NoResponse { operation: op.name.to_string() })
            }
            err = ctx.done() => Err(err),
        }
    }

    async fn apply_phase(
        &self,
        ctx: &CallContext,
        deployment: &DeploymentSpec,
        step: &DeploymentStep,
        action: ComponentAction,
        results: &mut ResultMap,
    ) -> Result<(), ProviderError> {
        let (op, done, failed) = match action {
            ComponentAction::Update => (&APPLY_UPDATE, State::Updated, State::UpdateFailed),
            ComponentAction::Delete => (&APPLY_DELETE, State::Deleted, State::DeleteFailed),
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
        let payload = serde_json::to_value(ApplyPayload {
            deployment: deployment.clone(),
            step: phase,
            is_dry_run: false,
        })?;

        let response = match self.exchange(ctx, &deployment.active_target, op, payload).await {
            Ok(response) => response,
            Err(e) => {
                merge_remote_failure(results, &names, failed, None, &e);
                return Err(e);
            }
        };
        if response.is_ok() {
            let remote = serde_json::from_value::<ResultMap>(response.body).ok();
            return merge_remote_success(results, &names, done, remote);
        }
        let error = remote_error(&response);
        merge_remote_failure(results, &names, failed, response.partial_results(), &error);
        Err(error)
    }

    async fn compare(
        &self,
        ctx: &CallContext,
        op: &Operation,
        desired: &[ComponentSpec],
        current: &[ComponentSpec],
    ) -> Result<bool, ProviderError> {
        let payload = serde_json::to_value(ComparePayload {
            desired: desired.to_vec(),
            current: current.to_vec(),
        })?;
        let body = self.call(ctx, "", op, payload).await?;
        Ok(serde_json::from_value(body)?)
    }
}

fn remote_error(response: &BusResponse) -> ProviderError {
    ProviderError::Remote {
        state: response.state,
        message: response.message(),
    }
}

#[async_trait]
impl TargetProvider for MqttTargetProvider {
    fn provider_type(&self) -> &'static str {
        PROVIDER_TYPE
    }

    async fn init(&self, config: serde_json::Value) -> Result<(), ProviderError> {
        self.connect(from_json("mqtt", config)?).await
    }

    async fn init_with_map(
        &self,
        properties: &HashMap<String, String>,
    ) -> Result<(), ProviderError> {
        self.connect(MqttConfig::from_map(properties)?).await
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
        let payload = serde_json::to_value(GetPayload {
            deployment: deployment.clone(),
            references: references.to_vec(),
        })?;
        let body = self
            .call(ctx, &deployment.active_target, &GET, payload)
            .await
            .inspect_err(|e| error!(error = %e, "get over bus failed"))?;
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
                error!(error = %e, ?action, "apply over bus failed");
                return Err(ApplyFailure::new(results, e));
            }
        }
        Ok(Some(results))
    }

    #[instrument(skip(self, ctx, deployment, components), fields(count = components.len()))]
    async fn remove(
        &self,
        ctx: &CallContext,
        deployment: &DeploymentSpec,
        components: &[ComponentSpec],
    ) -> Result<(), ProviderError> {
        let payload = serde_json::to_value(RemovePayload {
            deployment: deployment.clone(),
            components: components.to_vec(),
        })?;
        self.call(ctx, &deployment.active_target, &REMOVE, payload)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LegacyComparer for MqttTargetProvider {
    async fn needs_update(
        &self,
        ctx: &CallContext,
        desired: &[ComponentSpec],
        current: &[ComponentSpec],
    ) -> Result<bool, ProviderError> {
        self.compare(ctx, &NEEDS_UPDATE, desired, current).await
    }

    async fn needs_remove(
        &self,
        ctx: &CallContext,
        desired: &[ComponentSpec],
        current: &[ComponentSpec],
    ) -> Result<bool, ProviderError> {
        self.compare(ctx, &NEEDS_REMOVE, desired, current).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("brokerAddress", "tcp://localhost:1883"),
            ("clientID", "convoy"),
            ("requestTopic", "req"),
            ("responseTopic", "resp"),
        ]
    }

    #[test]
    fn test_config_defaults() {
        let cfg = MqttConfig::from_map(&props(&base())).unwrap();
        assert_eq!(cfg.timeout_seconds, 8);
        assert_eq!(cfg.keep_alive_seconds, 2);
        assert_eq!(cfg.ping_timeout_seconds, 1);
        assert!(!cfg.use_tls);
    }

    #[test]
    fn test_config_missing_key() {
        let mut pairs = base();
        pairs.retain(|(k, _)| *k != "clientID");
        let err = MqttConfig::from_map(&props(&pairs)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad config: 'clientID' is missing in mqtt provider config"
        );
    }

    #[test]
    fn test_config_integers() {
        let mut pairs = base();
        pairs.push(("timeoutSeconds", "soon"));
        assert!(MqttConfig::from_map(&props(&pairs)).unwrap_err().is_config_error());

        let mut pairs = base();
        pairs.push(("timeoutSeconds", "-3"));
        pairs.push(("useTLS", "true"));
        let cfg = MqttConfig::from_map(&props(&pairs)).unwrap();
        assert_eq!(cfg.timeout_seconds, 8);
        assert!(cfg.use_tls);
    }

    #[test]
    fn test_resolve_by_id_then_context() {
        let table = PendingTable::default();
        let mut get_rx = table.register("g1".into(), CallContextKind::Get);
        let mut apply_rx = table.register("a1".into(), CallContextKind::Apply);

        let req = BusRequest::new(CallContextKind::Apply, INSTANCES_ROUTE, "POST", serde_json::Value::Null, "a1");
        table.resolve(BusResponse::ok(&req, serde_json::Value::Null));
        assert!(apply_rx.try_recv().is_ok());
        assert!(get_rx.try_recv().is_err());

        let mut anonymous = BusResponse::ok(&req, serde_json::json!([]));
        anonymous.metadata.remove(convoy_model::bus::REQUEST_ID_KEY);
        anonymous.metadata.insert(
            convoy_model::bus::CALL_CONTEXT_KEY.to_string(),
            CallContextKind::Get.as_str().to_string(),
        );
        table.resolve(anonymous);
        assert!(get_rx.try_recv().is_ok());
        assert!(table.lock().is_empty());
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let provider = MqttTargetProvider::new(Arc::new(MemoryBus::new()));
        provider.init_with_map(&props(&base())).await.unwrap();

        let mut other = base();
        other[2] = ("requestTopic", "elsewhere");
        provider.init_with_map(&props(&other)).await.unwrap();
        assert_eq!(provider.connection().unwrap().config.request_topic, "req");
    }

    #[tokio::test]
    async fn test_calls_before_init_fail() {
        let provider = MqttTargetProvider::new(Arc::new(MemoryBus::new()));
        let err = provider
            .get(&CallContext::new(), &DeploymentSpec::default(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotInitialized));
    }
}

//! Remote agent serving a provider on a message bus
//!
//! The counterpart of [`MqttTargetProvider`](crate::mqtt::MqttTargetProvider):
//! reads requests from the request topic, runs them against a local
//! [`TargetProvider`] and publishes the reply on the response topic.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use convoy_model::{
    ApplyPayload, BusRequest, BusResponse, CallContextKind, ComparePayload, GetPayload,
    RemovePayload, State,
};

use crate::bus::MessageBus;
use crate::context::CallContext;
use crate::error::ProviderError;
use crate::traits::{LegacyComparer, TargetProvider};

/// Bus responder for one provider
pub struct RemoteAgent {
    provider: Arc<dyn TargetProvider>,
    comparer: Option<Arc<dyn LegacyComparer>>,
    bus: Arc<dyn MessageBus>,
    request_topic: String,
    response_topic: String,
}

impl RemoteAgent {
    pub fn new(
        provider: Arc<dyn TargetProvider>,
        bus: Arc<dyn MessageBus>,
        request_topic: impl Into<String>,
        response_topic: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            comparer: None,
            bus,
            request_topic: request_topic.into(),
            response_topic: response_topic.into(),
        }
    }

    /// Also answer `NeedsUpdate`/`NeedsRemove`
    #[must_use]
    pub fn with_comparer(mut self, comparer: Arc<dyn LegacyComparer>) -> Self {
        self.comparer = Some(comparer);
        self
    }

    /// Subscribe and serve on a background task until `cancel` fires
    ///
    /// The subscription is in place when this returns.
    pub async fn spawn(
        self,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, ProviderError> {
        let mut requests = self.bus.subscribe(&self.request_topic).await?;
        info!(
            provider = self.provider.provider_type(),
            request_topic = %self.request_topic,
            "remote agent listening"
        );
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    next = requests.next() => match next {
                        Some(payload) => self.handle_payload(&cancel, &payload).await,
                        None => break,
                    },
                }
            }
            debug!(request_topic = %self.request_topic, "remote agent stopped");
        }))
    }

    async fn handle_payload(&self, cancel: &CancellationToken, payload: &[u8]) {
        let request: BusRequest = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed bus request");
                return;
            }
        };
        let ctx = CallContext::with_cancellation(cancel.child_token());
        let response = self.handle(&ctx, &request).await;
        match serde_json::to_vec(&response) {
            Ok(bytes) => {
                if let Err(e) = self.bus.publish(&self.response_topic, bytes).await {
                    warn!(error = %e, "failed to publish response");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode response"),
        }
    }

    /// Answer one request
    #[instrument(skip(self, ctx, request), fields(route = %request.route, method = %request.method))]
    pub async fn handle(&self, ctx: &CallContext, request: &BusRequest) -> BusResponse {
        let Some(kind) = request.call_context().or_else(|| infer_kind(request)) else {
            return BusResponse::error(request, State::BadRequest, "unknown call context");
        };
        debug!(%kind, "handling request");
        match self.dispatch(ctx, kind, request).await {
            Ok(response) => response,
            Err(e) => BusResponse::error(request, e.state(), e.to_string()),
        }
    }

    async fn dispatch(
        &self,
        ctx: &CallContext,
        kind: CallContextKind,
        request: &BusRequest,
    ) -> Result<BusResponse, ProviderError> {
        match kind {
            CallContextKind::Get => {
                let payload: GetPayload = decode(request)?;
                let components = self
                    .provider
                    .get(ctx, &payload.deployment, &payload.references)
                    .await?;
                Ok(BusResponse::ok(request, serde_json::to_value(components)?))
            }
            CallContextKind::Apply => {
                let payload: ApplyPayload = decode(request)?;
                let outcome = self
                    .provider
                    .apply(ctx, &payload.deployment, &payload.step, payload.is_dry_run)
                    .await;
                Ok(match outcome {
                    Ok(results) => BusResponse::ok(request, serde_json::to_value(results)?),
                    Err(failure) => BusResponse::apply_error(
                        request,
                        failure.error.state(),
                        failure.results,
                        failure.error.to_string(),
                    ),
                })
            }
            CallContextKind::Remove => {
                let payload: RemovePayload = decode(request)?;
                self.provider
                    .remove(ctx, &payload.deployment, &payload.components)
                    .await?;
                Ok(BusResponse::ok(request, serde_json::Value::Null))
            }
            CallContextKind::NeedsUpdate | CallContextKind::NeedsRemove => {
                let Some(comparer) = &self.comparer else {
                    return Ok(BusResponse::error(
                        request,
                        State::BadRequest,
                        format!("{kind} is not supported by this agent"),
                    ));
                };
                let payload: ComparePayload = decode(request)?;
                let answer = if kind == CallContextKind::NeedsUpdate {
                    comparer
                        .needs_update(ctx, &payload.desired, &payload.current)
                        .await?
                } else {
                    comparer
                        .needs_remove(ctx, &payload.desired, &payload.current)
                        .await?
                };
                Ok(BusResponse::ok(request, serde_json::Value::Bool(answer)))
            }
        }
    }
}

/// Fallback for requests without a call context
fn infer_kind(request: &BusRequest) -> Option<CallContextKind> {
    match request.method.to_uppercase().as_str() {
        "GET" => Some(CallContextKind::Get),
        "POST" => Some(CallContextKind::Apply),
        "DELETE" => Some(CallContextKind::Remove),
        _ => None,
    }
}

fn decode<T: serde::de::DeserializeOwned>(request: &BusRequest) -> Result<T, ProviderError> {
    serde_json::from_value(request.body.clone())
        .map_err(|e| ProviderError::Serialization(format!("bad request body: {e}")))
}

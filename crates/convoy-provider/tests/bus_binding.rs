use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use convoy_model::{
    ApplyPayload, BusRequest, BusResponse, ComponentResultSpec, ComponentSpec, ComponentStep,
    DeploymentSpec, DeploymentStep, ResultMap, State,
};
use convoy_provider::*;

fn bus_config(timeout_seconds: &str) -> HashMap<String, String> {
    [
        ("brokerAddress", "memory://local"),
        ("clientID", "convoy-test"),
        ("requestTopic", "coa-request"),
        ("responseTopic", "coa-response"),
        ("timeoutSeconds", timeout_seconds),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn deployment() -> DeploymentSpec {
    let mut d = DeploymentSpec::default();
    d.instance.name = "inst-1".to_string();
    d.active_target = "edge".to_string();
    d
}

async fn connected(bus: Arc<MemoryBus>, timeout_seconds: &str) -> MqttTargetProvider {
    let provider = MqttTargetProvider::new(bus);
    provider
        .init_with_map(&bus_config(timeout_seconds))
        .await
        .unwrap();
    provider
}

#[tokio::test]
async fn test_round_trip_through_agent() {
    let bus = Arc::new(MemoryBus::new());
    let mock = Arc::new(MockTargetProvider::default());
    let cancel = CancellationToken::new();
    let _agent = RemoteAgent::new(mock.clone(), bus.clone(), "coa-request", "coa-response")
        .with_comparer(mock.clone())
        .spawn(cancel.clone())
        .await
        .unwrap();

    let provider = connected(bus, "5").await;
    let ctx = CallContext::new();
    let step = DeploymentStep::new(
        "edge",
        vec![
            ComponentStep::update(ComponentSpec::new("web", "container")),
            ComponentStep::update(ComponentSpec::new("db", "container")),
        ],
    );

    let results = provider
        .apply(&ctx, &deployment(), &step, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(results["web"].status, State::Updated);
    assert_eq!(results["db"].status, State::Updated);

    let current = provider.get(&ctx, &deployment(), &[]).await.unwrap();
    assert_eq!(current.len(), 2);

    let desired = vec![ComponentSpec::new("web", "container")];
    assert!(!provider.needs_update(&ctx, &desired, &current).await.unwrap());
    assert!(provider.needs_remove(&ctx, &desired, &current).await.unwrap());

    provider
        .remove(&ctx, &deployment(), &[ComponentSpec::new("db", "")])
        .await
        .unwrap();
    assert_eq!(mock.store().components("").len(), 1);

    cancel.cancel();
}

#[tokio::test]
async fn test_remote_failure_keeps_partial_results() {
    let bus = Arc::new(MemoryBus::new());
    let store = MockStore::new();
    store.fail_component("db");
    let mock = Arc::new(MockTargetProvider::new(store));
    let cancel = CancellationToken::new();
    let _agent = RemoteAgent::new(mock, bus.clone(), "coa-request", "coa-response")
        .spawn(cancel.clone())
        .await
        .unwrap();

    let provider = connected(bus, "5").await;
    let step = DeploymentStep::new(
        "edge",
        vec![
            ComponentStep::update(ComponentSpec::new("db", "")),
            ComponentStep::delete(ComponentSpec::new("old", "")),
        ],
    );
    let failure = provider
        .apply(&CallContext::new(), &deployment(), &step, false)
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ProviderError::Remote { .. }));
    assert_eq!(failure.results["db"].status, State::UpdateFailed);
    assert_eq!(failure.results["old"].status, State::Untouched);

    cancel.cancel();
}

#[tokio::test]
async fn test_remote_failure_mid_phase_reports_what_the_agent_did() {
    let bus = Arc::new(MemoryBus::new());
    let store = MockStore::new();
    store.fail_component("db");
    let mock = Arc::new(MockTargetProvider::new(store.clone()));
    let cancel = CancellationToken::new();
    let _agent = RemoteAgent::new(mock, bus.clone(), "coa-request", "coa-response")
        .spawn(cancel.clone())
        .await
        .unwrap();

    let provider = connected(bus, "5").await;
    let step = DeploymentStep::new(
        "edge",
        vec![
            ComponentStep::update(ComponentSpec::new("a", "")),
            ComponentStep::update(ComponentSpec::new("db", "")),
            ComponentStep::update(ComponentSpec::new("c", "")),
        ],
    );
    let failure = provider
        .apply(&CallContext::new(), &deployment(), &step, false)
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        ProviderError::Remote { state: State::UpdateFailed, .. }
    ));
    assert_eq!(failure.results["a"].status, State::Updated);
    assert_eq!(failure.results["db"].status, State::UpdateFailed);
    assert_eq!(failure.results["c"].status, State::Untouched);

    let stored: Vec<String> = store.components("").into_iter().map(|c| c.name).collect();
    assert_eq!(stored, ["a"]);

    cancel.cancel();
}

#[tokio::test]
async fn test_failed_status_in_ok_reply_fails_apply() {
    let bus = Arc::new(MemoryBus::new());
    let mut requests = bus.subscribe("coa-request").await.unwrap();
    let responder = bus.clone();
    tokio::spawn(async move {
        while let Some(payload) = requests.next().await {
            let request: BusRequest = serde_json::from_slice(&payload).unwrap();
            let apply: ApplyPayload = serde_json::from_value(request.body.clone()).unwrap();
            let results: ResultMap = apply
                .step
                .components
                .iter()
                .map(|c| {
                    let status = if c.component.name == "db" {
                        State::UpdateFailed
                    } else {
                        State::Updated
                    };
                    (c.component.name.clone(), ComponentResultSpec::new(status, "quota"))
                })
                .collect();
            let reply = BusResponse::ok(&request, serde_json::to_value(results).unwrap());
            responder
                .publish("coa-response", serde_json::to_vec(&reply).unwrap())
                .await
                .unwrap();
        }
    });

    let provider = connected(bus, "5").await;
    let step = DeploymentStep::new(
        "edge",
        vec![
            ComponentStep::update(ComponentSpec::new("api", "")),
            ComponentStep::update(ComponentSpec::new("db", "")),
        ],
    );
    let failure = provider
        .apply(&CallContext::new(), &deployment(), &step, false)
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        ProviderError::Operation { ref component, state: State::UpdateFailed, .. } if component == "db"
    ));
    assert_eq!(failure.results["api"].status, State::Updated);
    assert_eq!(failure.results["db"].message, "quota");
}

#[tokio::test]
async fn test_timeout_is_bounded() {
    let bus = Arc::new(MemoryBus::new());
    let provider = connected(bus, "1").await;

    let started = Instant::now();
    let err = provider
        .get(&CallContext::new(), &deployment(), &[])
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.to_string(), "didn't get response to Get() call over MQTT");
    assert!(elapsed >= Duration::from_millis(900));
    assert!(elapsed < Duration::from_secs(3));

    let step = DeploymentStep::new("edge", vec![ComponentStep::update(ComponentSpec::new("a", ""))]);
    let failure = provider
        .apply(&CallContext::new(), &deployment(), &step, false)
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ProviderError::NoResponse { .. }));
    assert_eq!(failure.results["a"].status, State::UpdateFailed);
}

#[tokio::test]
async fn test_cancellation_interrupts_wait() {
    let bus = Arc::new(MemoryBus::new());
    let provider = connected(bus, "30").await;
    let ctx = CallContext::new();
    let trigger = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = provider.get(&ctx, &deployment(), &[]).await.unwrap_err();
    assert!(matches!(err, ProviderError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_deadline_interrupts_wait() {
    let bus = Arc::new(MemoryBus::new());
    let provider = connected(bus, "30").await;
    let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
    let err = provider
        .remove(&ctx, &deployment(), &[ComponentSpec::new("a", "")])
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::DeadlineExceeded));
}

#[tokio::test]
async fn test_dry_run_sends_nothing() {
    let bus = Arc::new(MemoryBus::new());
    let provider = connected(bus, "1").await;
    let step = DeploymentStep::new("edge", vec![ComponentStep::update(ComponentSpec::new("a", ""))]);
    let started = Instant::now();
    let result = provider
        .apply(&CallContext::new(), &deployment(), &step, true)
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(started.elapsed() < Duration::from_millis(500));
}

//! `TargetActor`: Per-target reconciliation
//!
//! Owns the role to provider bindings of one target, reads current state,
//! plans steps and applies them. Roles are processed in the order their
//! components first appear in the solution and the first failing role stops
//! the run.

use std::collections::BTreeMap;
use std::sync::Arc;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use convoy_model::{
    ComponentAction, ComponentResultSpec, ComponentSpec, ComponentStep, DeploymentEvent,
    DeploymentSpec, DeploymentStep, ResultMap, State, TargetSpec,
};
use convoy_provider::{CallContext, TargetProvider};

use crate::config::ReconcileConfig;
use crate::error::CoreError;
use crate::message::{ApplyStep, GetCurrent, GetStatus, Reconcile, StepResult, TargetStatus};
use crate::planner::components_for_target;
use crate::reconcile::{TargetOutcome, plan_step};
use crate::state::TargetState;

/// Arguments for spawning a `TargetActor`
pub struct TargetActorArgs {
    pub spec: TargetSpec,
    /// Initialized providers keyed by binding role
    pub providers: BTreeMap<String, Arc<dyn TargetProvider>>,
    pub config: ReconcileConfig,
    /// Event broadcast sender
    pub event_tx: broadcast::Sender<DeploymentEvent>,
}

/// Per-target actor driving its providers
pub struct TargetActor {
    spec: TargetSpec,
    providers: BTreeMap<String, Arc<dyn TargetProvider>>,
    config: ReconcileConfig,
    event_tx: broadcast::Sender<DeploymentEvent>,
    state: TargetState,
    last_error: Option<String>,
    /// Components applied through each role, used to detect removals
    deployed: BTreeMap<String, Vec<ComponentSpec>>,
    reconcile_count: u64,
    /// Parent of every call context, cancelled when the actor stops
    cancel: CancellationToken,
}

impl TargetActor {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[must_use]
    pub fn state(&self) -> TargetState {
        self.state
    }

    fn set_state(&mut self, new_state: TargetState) {
        if self.state == new_state {
            return;
        }
        let old_state = self.state;
        self.state = new_state;

        debug!(
            target_name = %self.spec.name,
            from = %old_state,
            to = %new_state,
            "state transition"
        );

        let _ = self.event_tx.send(DeploymentEvent::TargetStateChanged {
            target: self.spec.name.clone(),
            from: old_state.to_string(),
            to: new_state.to_string(),
        });
    }

    fn fail_with_error(&mut self, error: impl Into<String>) {
        let error_msg = error.into();
        error!(
            target_name = %self.spec.name,
            previous_state = %self.state,
            error = %error_msg,
            "target operation failed"
        );
        self.last_error = Some(error_msg);
        self.set_state(TargetState::Failed);
    }

    fn succeed(&mut self) {
        self.last_error = None;
        self.set_state(TargetState::Idle);
    }

    fn call_context(&self) -> CallContext {
        let ctx = CallContext::with_cancellation(self.cancel.child_token());
        match self.config.call_timeout() {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    /// Role whose provider handles `component`
    ///
    /// A binding named after the component type wins over the default role.
    fn role_for(&self, component: &ComponentSpec) -> Result<String, CoreError> {
        let typed = &component.component_type;
        if !typed.is_empty() && self.providers.contains_key(typed) {
            return Ok(typed.clone());
        }
        if self.providers.contains_key(&self.config.default_role) {
            return Ok(self.config.default_role.clone());
        }
        let role = if typed.is_empty() {
            self.config.default_role.clone()
        } else {
            typed.clone()
        };
        Err(CoreError::NoBinding {
            target: self.spec.name.clone(),
            role,
        })
    }

    fn provider(&self, role: &str) -> Result<Arc<dyn TargetProvider>, CoreError> {
        self.providers
            .get(role)
            .cloned()
            .ok_or_else(|| CoreError::NoBinding {
                target: self.spec.name.clone(),
                role: role.to_string(),
            })
    }

    /// Components grouped by role, roles in order of first appearance
    fn group_by_role(
        &self,
        components: Vec<ComponentSpec>,
    ) -> Result<Vec<(String, Vec<ComponentSpec>)>, CoreError> {
        let mut groups: Vec<(String, Vec<ComponentSpec>)> = Vec::new();
        for component in components {
            let role = self.role_for(&component)?;
            match groups.iter_mut().find(|(r, _)| *r == role) {
                Some((_, list)) => list.push(component),
                None => groups.push((role, vec![component])),
            }
        }
        Ok(groups)
    }

    fn scoped(&self, deployment: DeploymentSpec) -> DeploymentSpec {
        DeploymentSpec {
            active_target: self.spec.name.clone(),
            ..deployment
        }
    }

    fn track_deployed(&mut self, role: &str, step: &DeploymentStep, results: &ResultMap) {
        let deployed = self.deployed.entry(role.to_string()).or_default();
        for item in &step.components {
            let name = &item.component.name;
            match (item.action, results.get(name).map(|r| r.status)) {
                (ComponentAction::Update, Some(State::Updated)) => {
                    deployed.retain(|c| c.name != *name);
                    deployed.push(item.component.clone());
                }
                (ComponentAction::Delete, Some(State::Deleted)) => {
                    deployed.retain(|c| c.name != *name);
                }
                _ => {}
            }
        }
        if deployed.is_empty() {
            self.deployed.remove(role);
        }
    }

    /// Apply one step and record what happened
    ///
    /// Provider failures come back inside the `StepResult`.
    #[instrument(skip(self, provider, deployment, step), fields(target_name = %self.spec.name))]
    async fn run_step(
        &mut self,
        provider: &Arc<dyn TargetProvider>,
        role: &str,
        deployment: &DeploymentSpec,
        step: &DeploymentStep,
        dry_run: bool,
    ) -> StepResult {
        self.set_state(TargetState::Applying);
        let ctx = self.call_context();

        let mut result = StepResult {
            target: self.spec.name.clone(),
            role: role.to_string(),
            results: ResultMap::new(),
            error: None,
        };

        match provider.apply(&ctx, deployment, step, dry_run).await {
            Ok(Some(results)) => {
                self.track_deployed(role, step, &results);
                for (component, r) in &results {
                    let _ = self.event_tx.send(DeploymentEvent::ComponentApplied {
                        target: self.spec.name.clone(),
                        component: component.clone(),
                        state: r.status,
                    });
                }
                let _ = self.event_tx.send(DeploymentEvent::StepCompleted {
                    target: self.spec.name.clone(),
                    success: true,
                    components: results.len(),
                });
                result.results = results;
            }
            Ok(None) => {
                result.results = step
                    .components
                    .iter()
                    .map(|c| {
                        (
                            c.component.name.clone(),
                            ComponentResultSpec::new(State::Untouched, "dry run"),
                        )
                    })
                    .collect();
                let _ = self.event_tx.send(DeploymentEvent::StepCompleted {
                    target: self.spec.name.clone(),
                    success: true,
                    components: result.results.len(),
                });
            }
            Err(failure) => {
                if !dry_run {
                    self.track_deployed(role, step, &failure.results);
                }
                let message = failure.error.to_string();
                let _ = self.event_tx.send(DeploymentEvent::StepFailed {
                    target: self.spec.name.clone(),
                    error: message.clone(),
                });
                self.fail_with_error(message.clone());
                result.results = failure.results;
                result.error = Some(message);
            }
        }
        result
    }

    async fn reconcile(
        &mut self,
        deployment: DeploymentSpec,
        dry_run: bool,
    ) -> Result<TargetOutcome, CoreError> {
        self.reconcile_count += 1;
        let desired = components_for_target(&deployment, &self.spec.name)?;
        let deployment = self.scoped(deployment);

        let mut groups = self.group_by_role(desired)?;
        for role in self.deployed.keys() {
            if !groups.iter().any(|(r, _)| r == role) {
                groups.push((role.clone(), Vec::new()));
            }
        }

        info!(
            target_name = %self.spec.name,
            roles = groups.len(),
            dry_run,
            "reconciling target"
        );

        let mut outcome = TargetOutcome::default();
        for (index, (role, desired)) in groups.into_iter().enumerate() {
            let provider = self.provider(&role)?;

            let previous = self.deployed.get(&role).cloned().unwrap_or_default();
            let mut references: Vec<ComponentStep> =
                desired.iter().cloned().map(ComponentStep::update).collect();
            references.extend(
                previous
                    .into_iter()
                    .filter(|p| !desired.iter().any(|d| d.name == p.name))
                    .map(ComponentStep::update),
            );

            self.set_state(TargetState::Reading);
            let ctx = self.call_context();
            let current = match provider.get(&ctx, &deployment, &references).await {
                Ok(current) => current,
                Err(e) => {
                    let message = e.to_string();
                    self.fail_with_error(message.clone());
                    outcome.error = Some(message);
                    return Ok(outcome);
                }
            };

            let mut step = plan_step(
                &self.spec.name,
                &desired,
                &current,
                &provider.validation_rule(),
            );
            step.role = role.clone();
            step.is_first = index == 0;

            for component in &desired {
                if !step
                    .components
                    .iter()
                    .any(|s| s.component.name == component.name)
                {
                    outcome.results.insert(
                        component.name.clone(),
                        ComponentResultSpec::new(State::Ok, "unchanged"),
                    );
                }
            }
            if step.is_empty() {
                debug!(target_name = %self.spec.name, role = %role, "role is up to date");
                continue;
            }

            let result = self
                .run_step(&provider, &role, &deployment, &step, dry_run)
                .await;
            outcome.results.extend(result.results);
            if let Some(error) = result.error {
                outcome.error = Some(error);
                return Ok(outcome);
            }
        }

        self.succeed();
        Ok(outcome)
    }
}

impl Actor for TargetActor {
    type Args = TargetActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(
            target_name = %args.spec.name,
            id = %actor_ref.id(),
            roles = ?args.providers.keys().collect::<Vec<_>>(),
            "TargetActor starting"
        );

        Ok(Self {
            spec: args.spec,
            providers: args.providers,
            config: args.config,
            event_tx: args.event_tx,
            state: TargetState::Idle,
            last_error: None,
            deployed: BTreeMap::new(),
            reconcile_count: 0,
            cancel: CancellationToken::new(),
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(target_name = %self.spec.name, reason = ?reason, "TargetActor stopping");
        self.cancel.cancel();
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<GetCurrent> for TargetActor {
    type Reply = Result<Vec<ComponentSpec>, CoreError>;

    async fn handle(
        &mut self,
        msg: GetCurrent,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let groups = self.group_by_role(msg.components)?;
        let deployment = self.scoped(msg.deployment);

        self.set_state(TargetState::Reading);
        let mut current = Vec::new();
        for (role, components) in groups {
            let provider = self.provider(&role)?;
            let references: Vec<ComponentStep> =
                components.into_iter().map(ComponentStep::update).collect();
            let ctx = self.call_context();
            match provider.get(&ctx, &deployment, &references).await {
                Ok(found) => current.extend(found),
                Err(e) => {
                    self.fail_with_error(e.to_string());
                    return Err(e.into());
                }
            }
        }
        self.succeed();
        Ok(current)
    }
}

impl Message<ApplyStep> for TargetActor {
    type Reply = Result<StepResult, CoreError>;

    async fn handle(
        &mut self,
        msg: ApplyStep,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let role = if msg.step.role.is_empty() {
            self.config.default_role.clone()
        } else {
            msg.step.role.clone()
        };
        let provider = self.provider(&role)?;
        let deployment = self.scoped(msg.deployment);

        let result = self
            .run_step(&provider, &role, &deployment, &msg.step, msg.dry_run)
            .await;
        if result.is_success() {
            self.succeed();
        }
        Ok(result)
    }
}

impl Message<Reconcile> for TargetActor {
    type Reply = Result<TargetOutcome, CoreError>;

    async fn handle(
        &mut self,
        msg: Reconcile,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let result = self.reconcile(msg.deployment, msg.dry_run).await;
        if let Err(e) = &result {
            self.fail_with_error(e.to_string());
        }
        result
    }
}

impl Message<GetStatus> for TargetActor {
    type Reply = TargetStatus;

    async fn handle(
        &mut self,
        _msg: GetStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        TargetStatus {
            name: self.spec.name.clone(),
            state: self.state,
            deployed: self
                .deployed
                .iter()
                .map(|(role, list)| {
                    let names = list.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
                    (role.clone(), names)
                })
                .collect(),
            reconcile_count: self.reconcile_count,
            error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use kameo::actor::Spawn;
    use kameo::error::SendError;

    use convoy_model::{BindingSpec, SolutionSpec};
    use convoy_provider::{MockStore, MockTargetProvider};

    use super::*;

    fn spawn_target(
        store: &MockStore,
    ) -> (ActorRef<TargetActor>, broadcast::Receiver<DeploymentEvent>) {
        let (event_tx, event_rx) = broadcast::channel(64);
        let spec = TargetSpec::new("edge")
            .with_binding(BindingSpec::new("instance", "providers.target.mock"));
        let provider: Arc<dyn TargetProvider> = Arc::new(MockTargetProvider::new(store.clone()));
        let args = TargetActorArgs {
            spec,
            providers: [("instance".to_string(), provider)].into(),
            config: ReconcileConfig::default(),
            event_tx,
        };
        (TargetActor::spawn(args), event_rx)
    }

    fn deployment(components: &[&str]) -> DeploymentSpec {
        let solution = SolutionSpec {
            components: components
                .iter()
                .map(|n| ComponentSpec::new(*n, "").with_property("image", format!("{n}:1")))
                .collect(),
            ..SolutionSpec::default()
        };
        let assignment: String = components.iter().map(|n| format!("{{{n}}}")).collect();
        DeploymentSpec {
            solution,
            assignments: [("edge".to_string(), assignment)].into(),
            ..DeploymentSpec::default()
        }
    }

    #[tokio::test]
    async fn test_reconcile_then_unchanged() {
        let store = MockStore::new();
        let (target, _rx) = spawn_target(&store);

        let outcome = target
            .ask(Reconcile {
                deployment: deployment(&["web", "db"]),
                dry_run: false,
            })
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.results["web"].status, State::Updated);

        let outcome = target
            .ask(Reconcile {
                deployment: deployment(&["web", "db"]),
                dry_run: false,
            })
            .await
            .unwrap();
        assert_eq!(outcome.results["db"].status, State::Ok);
        assert_eq!(outcome.results["db"].message, "unchanged");

        let status = target.ask(GetStatus).await.unwrap();
        assert_eq!(status.state, TargetState::Idle);
        assert_eq!(status.reconcile_count, 2);
        assert_eq!(status.deployed["instance"], vec!["web", "db"]);
    }

    #[tokio::test]
    async fn test_apply_step_defaults_role() {
        let store = MockStore::new();
        let (target, mut rx) = spawn_target(&store);

        let step = DeploymentStep::new(
            "edge",
            vec![ComponentStep::update(ComponentSpec::new("web", ""))],
        );
        let result = target
            .ask(ApplyStep {
                deployment: DeploymentSpec::default(),
                step,
                dry_run: false,
            })
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.role, "instance");

        let mut saw_applied = false;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, DeploymentEvent::ComponentApplied { ref component, .. } if component == "web") {
                saw_applied = true;
            }
        }
        assert!(saw_applied);
    }

    #[tokio::test]
    async fn test_missing_binding() {
        let store = MockStore::new();
        let (target, _rx) = spawn_target(&store);

        let mut step = DeploymentStep::new("edge", Vec::new());
        step.role = "helm".to_string();
        let err = target
            .ask(ApplyStep {
                deployment: DeploymentSpec::default(),
                step,
                dry_run: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SendError::HandlerError(CoreError::NoBinding { ref role, .. }) if role == "helm"
        ));
    }

    #[tokio::test]
    async fn test_get_current_reads_store() {
        let store = MockStore::new();
        let (target, _rx) = spawn_target(&store);
        target
            .ask(Reconcile {
                deployment: deployment(&["web"]),
                dry_run: false,
            })
            .await
            .unwrap();

        let current = target
            .ask(GetCurrent {
                deployment: DeploymentSpec::default(),
                components: vec![ComponentSpec::new("web", "")],
            })
            .await
            .unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].name, "web");
    }
}

//! `DeploymentActor`: Multi-target orchestration
//!
//! Keeps the registry of `TargetActor`s, computes assignments and fans a
//! deployment out to every assigned target concurrently.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::{ActorStopReason, SendError};
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use convoy_model::{BindingSpec, DeploymentEvent, TargetSpec};
use convoy_provider::{
    BuiltinDeps, ProviderError, ProviderRegistry, ProviderSource, TargetProvider,
};

use crate::actor::target::{TargetActor, TargetActorArgs};
use crate::config::ReconcileConfig;
use crate::error::CoreError;
use crate::message::{
    Deploy, DeploySolution, GetStatus, GetTargetStatus, ListTargets, Reconcile, RegisterTarget,
    TargetStatus, UnregisterTarget,
};
use crate::planner::{assign_components, build_deployment};
use crate::reconcile::{DeploymentSummary, ResultCollector};

/// Builds the provider behind one binding of a target
#[async_trait::async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn create_provider(
        &self,
        target: &TargetSpec,
        binding: &BindingSpec,
    ) -> Result<Arc<dyn TargetProvider>, CoreError>;
}

/// Factory resolving bindings through a provider registry
pub struct RegistryProviderFactory {
    source: Arc<dyn ProviderSource>,
}

impl RegistryProviderFactory {
    pub fn new(source: Arc<dyn ProviderSource>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl ProviderFactory for RegistryProviderFactory {
    async fn create_provider(
        &self,
        target: &TargetSpec,
        binding: &BindingSpec,
    ) -> Result<Arc<dyn TargetProvider>, CoreError> {
        info!(
            target_name = %target.name,
            role = %binding.role,
            provider = %binding.provider,
            "creating provider"
        );
        self.source
            .try_create(&binding.provider, &binding.config)
            .await?
            .ok_or_else(|| ProviderError::UnknownProviderType(binding.provider.clone()).into())
    }
}

/// Arguments for spawning a `DeploymentActor`
pub struct DeploymentActorArgs {
    pub factory: Arc<dyn ProviderFactory>,
    pub config: ReconcileConfig,
    /// Sender to publish events on, a private channel is created when absent
    pub events: Option<broadcast::Sender<DeploymentEvent>>,
}

impl Default for DeploymentActorArgs {
    fn default() -> Self {
        let registry = ProviderRegistry::with_builtin(BuiltinDeps::default());
        Self {
            factory: Arc::new(RegistryProviderFactory::new(Arc::new(registry))),
            config: ReconcileConfig::default(),
            events: None,
        }
    }
}

/// Deployment coordinator owning all target actors
pub struct DeploymentActor {
    targets: BTreeMap<String, ActorRef<TargetActor>>,
    specs: BTreeMap<String, TargetSpec>,
    factory: Arc<dyn ProviderFactory>,
    config: ReconcileConfig,
    event_tx: broadcast::Sender<DeploymentEvent>,
}

/// Handler errors pass through, mailbox and lifecycle failures become `ActorError`
fn flatten_send_error<M: fmt::Debug>(err: SendError<M, CoreError>) -> CoreError {
    match err {
        SendError::HandlerError(e) => e,
        other => CoreError::ActorError(other.to_string()),
    }
}

impl DeploymentActor {
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    async fn spawn_target_actor(
        &self,
        spec: TargetSpec,
    ) -> Result<ActorRef<TargetActor>, CoreError> {
        let mut providers = BTreeMap::new();
        for binding in spec.bindings() {
            let provider = self.factory.create_provider(&spec, binding).await?;
            providers.insert(binding.role.clone(), provider);
        }

        let name = spec.name.clone();
        let args = TargetActorArgs {
            spec,
            providers,
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
        };
        let actor_ref = TargetActor::spawn(args);

        info!(target_name = %name, "spawned TargetActor");

        Ok(actor_ref)
    }

    async fn deploy(&self, msg: Deploy) -> Result<DeploymentSummary, CoreError> {
        let mut deployment = msg.deployment;
        if deployment.targets.is_empty() {
            let selector = &deployment.instance.target;
            deployment.targets = self
                .specs
                .iter()
                .filter(|(name, spec)| selector.selects(name, &spec.properties))
                .map(|(name, spec)| (name.clone(), spec.clone()))
                .collect();
        }
        if deployment.assignments.is_empty() {
            deployment.assignments = assign_components(&deployment.solution, &deployment.targets)?;
        }

        let mut selected = Vec::with_capacity(deployment.assignments.len());
        for name in deployment.assignments.keys() {
            let actor_ref = self
                .targets
                .get(name)
                .ok_or_else(|| CoreError::TargetNotFound(name.clone()))?;
            selected.push((name.clone(), actor_ref.clone()));
        }

        let instance = deployment.instance_name().to_string();
        info!(
            instance = %instance,
            targets = selected.len(),
            dry_run = msg.dry_run,
            "starting deployment"
        );

        let mut handles = Vec::with_capacity(selected.len());
        for (name, actor_ref) in selected {
            let deployment = deployment.clone();
            let dry_run = msg.dry_run;
            let handle = tokio::spawn(async move {
                actor_ref
                    .ask(Reconcile {
                        deployment,
                        dry_run,
                    })
                    .await
                    .map_err(flatten_send_error)
            });
            handles.push((name, handle));
        }

        let mut collector = ResultCollector::new(instance.clone(), msg.dry_run);
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => match outcome.error {
                    Some(error) => collector.record_failure(&name, outcome.results, error),
                    None => collector.record(&name, outcome.results),
                },
                Ok(Err(e)) => {
                    error!(target_name = %name, error = %e, "reconcile failed");
                    collector.record_failure(&name, BTreeMap::new(), e.to_string());
                }
                Err(e) => {
                    error!(target_name = %name, error = %e, "reconcile task panicked");
                    collector.record_failure(&name, BTreeMap::new(), "task panicked");
                }
            }
        }

        let summary = collector.finish();
        info!(
            instance = %instance,
            success = summary.success,
            components = summary.component_count(),
            "deployment finished"
        );
        let _ = self.event_tx.send(DeploymentEvent::DeploymentCompleted {
            instance,
            success: summary.success,
        });

        Ok(summary)
    }
}

impl Actor for DeploymentActor {
    type Args = DeploymentActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        let event_tx = args
            .events
            .unwrap_or_else(|| broadcast::channel(args.config.event_channel_capacity.max(1)).0);

        info!(id = %actor_ref.id(), "DeploymentActor starting");

        Ok(Self {
            targets: BTreeMap::new(),
            specs: BTreeMap::new(),
            factory: args.factory,
            config: args.config,
            event_tx,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(reason = ?reason, "DeploymentActor stopping");

        for (name, actor_ref) in &self.targets {
            info!(target_name = %name, "stopping TargetActor");
            actor_ref.stop_gracefully().await.ok();
        }

        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<RegisterTarget> for DeploymentActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: RegisterTarget,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let name = msg.spec.name.clone();

        if self.targets.contains_key(&name) {
            return Err(CoreError::TargetAlreadyExists(name));
        }

        let actor_ref = self.spawn_target_actor(msg.spec.clone()).await?;
        self.targets.insert(name.clone(), actor_ref);
        self.specs.insert(name, msg.spec);

        Ok(())
    }
}

impl Message<UnregisterTarget> for DeploymentActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: UnregisterTarget,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let name = &msg.name;

        if let Some(actor_ref) = self.targets.remove(name) {
            self.specs.remove(name);
            actor_ref.stop_gracefully().await.ok();
            info!(target_name = %name, "unregistered target");
            Ok(())
        } else {
            Err(CoreError::TargetNotFound(name.clone()))
        }
    }
}

impl Message<GetTargetStatus> for DeploymentActor {
    type Reply = Result<TargetStatus, CoreError>;

    async fn handle(
        &mut self,
        msg: GetTargetStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let actor_ref = self
            .targets
            .get(&msg.name)
            .ok_or_else(|| CoreError::TargetNotFound(msg.name.clone()))?;

        actor_ref
            .ask(GetStatus)
            .await
            .map_err(|e| CoreError::ActorError(e.to_string()))
    }
}

impl Message<ListTargets> for DeploymentActor {
    type Reply = Vec<TargetStatus>;

    async fn handle(
        &mut self,
        _msg: ListTargets,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let mut statuses = Vec::with_capacity(self.targets.len());

        for (name, actor_ref) in &self.targets {
            match actor_ref.ask(GetStatus).await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    warn!(target_name = %name, error = %e, "failed to get target status");
                }
            }
        }

        statuses
    }
}

impl Message<Deploy> for DeploymentActor {
    type Reply = Result<DeploymentSummary, CoreError>;

    async fn handle(&mut self, msg: Deploy, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.deploy(msg).await
    }
}

impl Message<DeploySolution> for DeploymentActor {
    type Reply = Result<DeploymentSummary, CoreError>;

    async fn handle(
        &mut self,
        msg: DeploySolution,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let specs: Vec<TargetSpec> = self.specs.values().cloned().collect();
        let deployment = build_deployment(&msg.solution, &msg.instance, &specs)?;
        self.deploy(Deploy {
            deployment,
            dry_run: msg.dry_run,
        })
        .await
    }
}

use std::sync::Arc;

use kameo::actor::{ActorRef, Spawn};
use kameo::error::SendError;
use tokio::sync::broadcast;

use convoy_core::*;
use convoy_model::{
    BindingSpec, ComponentSpec, DeploymentEvent, DeploymentSpec, InstanceSpec, SolutionSpec, State,
    TargetSpec,
};
use convoy_provider::{BuiltinDeps, MockStore, ProviderRegistry};

const MOCK: &str = "providers.target.mock";

fn spawn_deployer(
    store: &MockStore,
) -> (ActorRef<DeploymentActor>, broadcast::Receiver<DeploymentEvent>) {
    let registry = ProviderRegistry::with_builtin(BuiltinDeps {
        mock_store: store.clone(),
        ..BuiltinDeps::default()
    });
    let (tx, rx) = broadcast::channel(256);
    let args = DeploymentActorArgs {
        factory: Arc::new(RegistryProviderFactory::new(Arc::new(registry))),
        config: ReconcileConfig::default(),
        events: Some(tx),
    };
    (DeploymentActor::spawn(args), rx)
}

fn mock_target(name: &str, os: &str) -> TargetSpec {
    TargetSpec::new(name)
        .with_property("os", os)
        .with_binding(BindingSpec::new("instance", MOCK).with_config("id", name))
}

fn shop(components: Vec<ComponentSpec>) -> SolutionSpec {
    SolutionSpec {
        components,
        ..SolutionSpec::default()
    }
}

fn instance() -> InstanceSpec {
    InstanceSpec {
        name: "shop-1".to_string(),
        solution: "shop".to_string(),
        ..InstanceSpec::default()
    }
}

fn names(store: &MockStore, id: &str) -> Vec<String> {
    store.components(id).into_iter().map(|c| c.name).collect()
}

async fn register(deployer: &ActorRef<DeploymentActor>, spec: TargetSpec) {
    deployer.ask(RegisterTarget { spec }).await.unwrap();
}

#[tokio::test]
async fn test_deploy_solution_places_components() {
    let store = MockStore::new();
    let (deployer, mut rx) = spawn_deployer(&store);
    register(&deployer, mock_target("linux-1", "linux")).await;
    register(&deployer, mock_target("win-1", "windows")).await;

    let solution = shop(vec![
        ComponentSpec::new("web", "").with_property("image", "web:1"),
        ComponentSpec::new("agent", "").with_constraints("$equal($property(os), windows)"),
    ]);

    let summary = deployer
        .ask(DeploySolution {
            solution,
            instance: instance(),
            dry_run: false,
        })
        .await
        .unwrap();

    assert!(summary.success);
    assert_eq!(summary.instance, "shop-1");
    assert_eq!(summary.targets.len(), 2);
    assert_eq!(names(&store, "linux-1"), vec!["web"]);
    assert_eq!(names(&store, "win-1"), vec!["web", "agent"]);
    assert_eq!(summary.targets["win-1"].results["agent"].status, State::Updated);

    let mut completed = false;
    while let Ok(ev) = rx.try_recv() {
        if let DeploymentEvent::DeploymentCompleted { instance, success } = ev {
            assert_eq!(instance, "shop-1");
            assert!(success);
            completed = true;
        }
    }
    assert!(completed);

    deployer.stop_gracefully().await.unwrap();
}

#[tokio::test]
async fn test_redeploy_removes_dropped_components() {
    let store = MockStore::new();
    let (deployer, _rx) = spawn_deployer(&store);
    register(&deployer, mock_target("edge", "linux")).await;

    let full = shop(vec![
        ComponentSpec::new("web", "").with_property("image", "web:1"),
        ComponentSpec::new("db", "").with_property("image", "db:1"),
    ]);
    deployer
        .ask(DeploySolution {
            solution: full,
            instance: instance(),
            dry_run: false,
        })
        .await
        .unwrap();
    assert_eq!(names(&store, "edge"), vec!["web", "db"]);

    let reduced = shop(vec![ComponentSpec::new("web", "").with_property("image", "web:2")]);
    let summary = deployer
        .ask(DeploySolution {
            solution: reduced,
            instance: instance(),
            dry_run: false,
        })
        .await
        .unwrap();

    assert!(summary.success);
    let results = &summary.targets["edge"].results;
    assert_eq!(results["web"].status, State::Updated);
    assert_eq!(results["db"].status, State::Deleted);
    assert_eq!(names(&store, "edge"), vec!["web"]);

    let status = deployer
        .ask(GetTargetStatus {
            name: "edge".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(status.deployed["instance"], vec!["web"]);
    assert_eq!(status.reconcile_count, 2);
}

#[tokio::test]
async fn test_dry_run_leaves_store_untouched() {
    let store = MockStore::new();
    let (deployer, _rx) = spawn_deployer(&store);
    register(&deployer, mock_target("edge", "linux")).await;

    let summary = deployer
        .ask(DeploySolution {
            solution: shop(vec![ComponentSpec::new("web", "")]),
            instance: instance(),
            dry_run: true,
        })
        .await
        .unwrap();

    assert!(summary.success);
    assert!(summary.dry_run);
    assert_eq!(summary.targets["edge"].results["web"].status, State::Untouched);
    assert!(store.components("edge").is_empty());
}

#[tokio::test]
async fn test_injected_failure_reports_partial_outcome() {
    let store = MockStore::new();
    store.fail_component("db");
    let (deployer, _rx) = spawn_deployer(&store);
    register(&deployer, mock_target("edge", "linux")).await;
    register(&deployer, mock_target("other", "linux")).await;

    let summary = deployer
        .ask(DeploySolution {
            solution: shop(vec![
                ComponentSpec::new("web", ""),
                ComponentSpec::new("db", ""),
                ComponentSpec::new("cache", ""),
            ]),
            instance: instance(),
            dry_run: false,
        })
        .await
        .unwrap();

    assert!(!summary.success);
    assert_eq!(summary.failed_targets(), vec!["edge", "other"]);
    let edge = &summary.targets["edge"];
    assert_eq!(edge.results["web"].status, State::Updated);
    assert_eq!(edge.results["db"].status, State::UpdateFailed);
    assert_eq!(edge.results["cache"].status, State::Untouched);
    assert!(edge.error.is_some());
    assert_eq!(names(&store, "edge"), vec!["web"]);

    let status = deployer
        .ask(GetTargetStatus {
            name: "edge".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(status.state, TargetState::Failed);
    assert!(status.error.is_some());
}

#[tokio::test]
async fn test_registration_errors() {
    let store = MockStore::new();
    let (deployer, _rx) = spawn_deployer(&store);
    register(&deployer, mock_target("edge", "linux")).await;

    let duplicate = deployer
        .ask(RegisterTarget {
            spec: mock_target("edge", "linux"),
        })
        .await;
    assert!(matches!(
        duplicate,
        Err(SendError::HandlerError(CoreError::TargetAlreadyExists(_)))
    ));

    let unknown = deployer
        .ask(RegisterTarget {
            spec: TargetSpec::new("odd")
                .with_binding(BindingSpec::new("instance", "providers.target.nope")),
        })
        .await;
    assert!(matches!(
        unknown,
        Err(SendError::HandlerError(CoreError::Provider(_)))
    ));

    let targets = deployer.ask(ListTargets).await.unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].name, "edge");
    assert_eq!(targets[0].state, TargetState::Idle);
}

#[tokio::test]
async fn test_deploy_to_unregistered_target_fails() {
    let store = MockStore::new();
    let (deployer, _rx) = spawn_deployer(&store);
    register(&deployer, mock_target("edge", "linux")).await;

    let mut deployment = DeploymentSpec {
        solution: shop(vec![ComponentSpec::new("web", "")]),
        instance: instance(),
        ..DeploymentSpec::default()
    };
    deployment
        .targets
        .insert("ghost".to_string(), mock_target("ghost", "linux"));

    let result = deployer
        .ask(Deploy {
            deployment,
            dry_run: false,
        })
        .await;
    assert!(matches!(
        result,
        Err(SendError::HandlerError(CoreError::TargetNotFound(ref name))) if name == "ghost"
    ));

    deployer
        .ask(UnregisterTarget {
            name: "edge".to_string(),
        })
        .await
        .unwrap();
    let missing = deployer
        .ask(GetTargetStatus {
            name: "edge".to_string(),
        })
        .await;
    assert!(matches!(
        missing,
        Err(SendError::HandlerError(CoreError::TargetNotFound(_)))
    ));
}

#[tokio::test]
async fn test_deploy_uses_registered_targets_when_none_given() {
    let store = MockStore::new();
    let (deployer, _rx) = spawn_deployer(&store);
    register(&deployer, mock_target("a", "linux")).await;
    register(&deployer, mock_target("b", "linux")).await;

    let deployment = DeploymentSpec {
        solution: shop(vec![ComponentSpec::new("web", "")]),
        instance: instance(),
        ..DeploymentSpec::default()
    };
    let summary = deployer
        .ask(Deploy {
            deployment,
            dry_run: false,
        })
        .await
        .unwrap();

    assert_eq!(
        summary.targets.keys().cloned().collect::<Vec<_>>(),
        vec!["a", "b"]
    );
    assert_eq!(names(&store, "a"), vec!["web"]);
    assert_eq!(names(&store, "b"), vec!["web"]);
}

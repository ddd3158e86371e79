//! convoy
//!
//! Deploys a solution instance onto its targets and prints the per-target
//! outcome as JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use eyre::{WrapErr, bail, eyre};
use kameo::actor::Spawn;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use convoy_core::{
    Deploy, DeploymentActor, DeploymentActorArgs, DeploymentSummary, RegisterTarget,
};
use convoy_model::{DeploymentSpec, TargetSpec};

mod config;
mod factory;

use config::Config;
use factory::DefaultProviderFactory;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(about = "Place solution components on targets and reconcile them", long_about = None)]
struct Cli {
    /// Configuration file, overrides CONVOY_CONFIG and the default paths
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Plan and validate without changing any target
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Deployment document (JSON)
    deployment: PathBuf,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_deployment(path: &Path) -> Result<DeploymentSpec> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let mut deployment: DeploymentSpec = serde_json::from_str(&content)
        .wrap_err_with(|| format!("failed to parse {}", path.display()))?;
    for (name, target) in &mut deployment.targets {
        if target.name.is_empty() {
            target.name.clone_from(name);
        }
    }
    Ok(deployment)
}

/// Configured targets overlaid with the deployment's own, by name
fn merge_targets(
    configured: Vec<TargetSpec>,
    deployment: &DeploymentSpec,
) -> BTreeMap<String, TargetSpec> {
    let mut targets: BTreeMap<String, TargetSpec> = configured
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect();
    targets.extend(
        deployment
            .targets
            .iter()
            .map(|(name, t)| (name.clone(), t.clone())),
    );
    targets
}

async fn run(cli: Cli, config: Config) -> Result<DeploymentSummary> {
    let deployment = read_deployment(&cli.deployment)?;
    let targets = merge_targets(config.targets, &deployment);
    if targets.is_empty() {
        bail!("no targets in the deployment or the configuration");
    }

    let args = DeploymentActorArgs {
        factory: Arc::new(DefaultProviderFactory::new(config.providers)),
        config: config.reconcile,
        events: None,
    };
    let deployer = DeploymentActor::spawn(args);

    for spec in targets.into_values() {
        let name = spec.name.clone();
        deployer
            .ask(RegisterTarget { spec })
            .await
            .map_err(|e| eyre!("failed to register target {name}: {e}"))?;
    }

    let summary = deployer
        .ask(Deploy {
            deployment,
            dry_run: cli.dry_run,
        })
        .await
        .map_err(|e| eyre!("deployment failed: {e}"));

    deployer.stop_gracefully().await.ok();
    summary
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let (config, config_path) = Config::load_default(cli.config.as_deref())?;
    init_tracing(&config.log_level, cli.json_logs || config.json_logs);
    match &config_path {
        Some(path) => info!(path = %path.display(), "loaded configuration"),
        None => warn!("no config file found, using defaults"),
    }

    let summary = run(cli, config).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.success {
        bail!(
            "deployment of {} failed on: {}",
            summary.instance,
            summary.failed_targets().join(", ")
        );
    }
    Ok(())
}

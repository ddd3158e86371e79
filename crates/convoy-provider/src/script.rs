//! Script target provider
//!
//! Delegates each contract operation to a user script. Inputs are staged as
//! JSON files and their absolute paths passed as arguments:
//!
//! - `getScript <deployment.json> <references.json>` writes the current
//!   components to `<id>-output.json` next to its first argument
//! - `applyScript <deployment.json> <components.json>` for updates
//! - `removeScript <deployment.json> <components.json>` for deletions
//! - `needsUpdate`/`needsRemove <current.json> <desired.json>` print `1`/`true`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use convoy_exec::CommandRunner;
use convoy_model::component::{needs_remove, needs_update};
use convoy_model::{
    ComponentAction, ComponentSpec, ComponentStep, DeploymentSpec, DeploymentStep, ResultMap,
    State, ValidationRule,
};

use crate::apply::{mark_all, validate_step};
use crate::config::{MapConfig, from_json};
use crate::context::CallContext;
use crate::error::{ApplyFailure, ProviderError};
use crate::traits::{LegacyComparer, TargetProvider};

pub const PROVIDER_TYPE: &str = "providers.target.script";

/// Script provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptConfig {
    pub name: String,
    pub script_folder: String,
    pub staging_folder: String,
    pub apply_script: String,
    pub remove_script: String,
    pub get_script: String,
    pub needs_update: String,
    pub needs_remove: String,
    pub script_engine: String,
}

impl ScriptConfig {
    pub fn from_map(properties: &HashMap<String, String>) -> Result<Self, ProviderError> {
        let cfg = MapConfig::new("script", properties);
        let config = Self {
            name: cfg.string_or("name", ""),
            script_folder: cfg.string_or("scriptFolder", ""),
            staging_folder: cfg.string_or("stagingFolder", ""),
            apply_script: cfg.required("applyScript")?,
            remove_script: cfg.required("removeScript")?,
            get_script: cfg.required("getScript")?,
            needs_update: cfg.string_or("needsUpdate", ""),
            needs_remove: cfg.string_or("needsRemove", ""),
            script_engine: cfg.string_or("scriptEngine", "bash"),
        };
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ProviderError> {
        match self.script_engine.as_str() {
            "" | "bash" | "powershell" => Ok(()),
            other => Err(ProviderError::Config(format!(
                "unsupported script engine '{other}', expected bash or powershell"
            ))),
        }
    }

    fn is_remote(&self) -> bool {
        self.script_folder.starts_with("http")
    }

    fn staging_dir(&self) -> PathBuf {
        if self.staging_folder.is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&self.staging_folder)
        }
    }

    /// Where `script` lives locally; downloaded scripts sit in staging
    fn script_path(&self, script: &str) -> Result<PathBuf, ProviderError> {
        let base = if self.is_remote() {
            self.staging_dir()
        } else {
            PathBuf::from(&self.script_folder)
        };
        Ok(std::path::absolute(base.join(script))?)
    }

    fn engine(&self) -> &str {
        if self.script_engine.is_empty() {
            "bash"
        } else {
            &self.script_engine
        }
    }

    fn scripts(&self) -> impl Iterator<Item = &str> {
        [
            self.apply_script.as_str(),
            self.remove_script.as_str(),
            self.get_script.as_str(),
            self.needs_update.as_str(),
            self.needs_remove.as_str(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
    }
}

/// Provider running user scripts through a [`CommandRunner`]
pub struct ScriptTargetProvider {
    config: Mutex<Option<ScriptConfig>>,
    runner: Arc<dyn CommandRunner>,
    client: reqwest::Client,
}

impl ScriptTargetProvider {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config: Mutex::new(None),
            runner,
            client: reqwest::Client::new(),
        }
    }

    fn config(&self) -> Result<ScriptConfig, ProviderError> {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ProviderError::NotInitialized)
    }

    async fn configure(&self, config: ScriptConfig) -> Result<(), ProviderError> {
        config.check()?;
        let staging = config.staging_dir();
        tokio::fs::create_dir_all(&staging).await?;
        if config.is_remote() {
            for script in config.scripts() {
                self.download(&config.script_folder, script, &staging).await?;
            }
        }
        info!(name = %config.name, engine = config.engine(), "script provider initialized");
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config);
        Ok(())
    }

    async fn download(&self, folder: &str, script: &str, staging: &Path) -> Result<(), ProviderError> {
        let mut base = folder.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = url::Url::parse(&base)
            .and_then(|u| u.join(script))
            .map_err(|e| ProviderError::Config(format!("invalid scriptFolder '{folder}': {e}")))?;
        debug!(%url, "downloading script");
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Http(format!(
                "failed to download {url}: {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        tokio::fs::write(staging.join(script), &bytes).await?;
        Ok(())
    }

    async fn stage<T: Serialize + Sync + ?Sized>(
        dir: &Path,
        name: &str,
        value: &T,
    ) -> Result<PathBuf, ProviderError> {
        let path = std::path::absolute(dir.join(name))?;
        tokio::fs::write(&path, serde_json::to_vec_pretty(value)?).await?;
        Ok(path)
    }

    async fn cleanup(paths: &[PathBuf]) {
        for path in paths {
            if let Err(e) = tokio::fs::remove_file(path).await {
                debug!(path = %path.display(), error = %e, "failed to remove staged file");
            }
        }
    }

    /// Run `script` under the configured engine, returning stdout
    async fn run_script(
        &self,
        ctx: &CallContext,
        config: &ScriptConfig,
        script: &str,
        args: &[PathBuf],
    ) -> Result<String, ProviderError> {
        let mut argv = vec![config.script_path(script)?.display().to_string()];
        argv.extend(args.iter().map(|p| p.display().to_string()));
        debug!(engine = config.engine(), script, "running script");
        let result = ctx
            .run(async {
                self.runner
                    .run(config.engine(), &argv)
                    .await
                    .map_err(ProviderError::from)
            })
            .await?
            .into_success()?;
        Ok(result.stdout)
    }

    async fn run_pair(
        &self,
        ctx: &CallContext,
        script: &str,
        first: &(impl Serialize + Sync),
        second: &(impl Serialize + Sync),
    ) -> Result<String, ProviderError> {
        let config = self.config()?;
        let dir = config.staging_dir();
        let id = Uuid::new_v4();
        let a = Self::stage(&dir, &format!("{id}.json"), first).await?;
        let b = Self::stage(&dir, &format!("{id}-2.json"), second).await?;
        let result = self.run_script(ctx, &config, script, &[a.clone(), b.clone()]).await;
        Self::cleanup(&[a, b]).await;
        result
    }

    async fn compare(
        &self,
        ctx: &CallContext,
        script: &str,
        desired: &[ComponentSpec],
        current: &[ComponentSpec],
    ) -> Result<bool, ProviderError> {
        let out = self.run_pair(ctx, script, &current, &desired).await?;
        let out = out.trim().to_lowercase();
        Ok(out == "1" || out == "true")
    }
}

#[async_trait]
impl TargetProvider for ScriptTargetProvider {
    fn provider_type(&self) -> &'static str {
        PROVIDER_TYPE
    }

    async fn init(&self, config: serde_json::Value) -> Result<(), ProviderError> {
        self.configure(from_json("script", config)?).await
    }

    async fn init_with_map(
        &self,
        properties: &HashMap<String, String>,
    ) -> Result<(), ProviderError> {
        self.configure(ScriptConfig::from_map(properties)?).await
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
        let config = self.config()?;
        let dir = config.staging_dir();
        let id = Uuid::new_v4();
        let input = Self::stage(&dir, &format!("{id}.json"), deployment).await?;
        let refs = Self::stage(&dir, &format!("{id}-refs.json"), references).await?;
        let output = dir.join(format!("{id}-output.json"));

        let result = self
            .run_script(ctx, &config, &config.get_script, &[input.clone(), refs.clone()])
            .await;
        Self::cleanup(&[input, refs]).await;
        if let Err(e) = result {
            error!(error = %e, "failed to run get script");
            return Err(e);
        }

        let data = tokio::fs::read(&output).await?;
        Self::cleanup(&[output]).await;
        serde_json::from_slice(&data).map_err(|e| {
            ProviderError::Serialization(format!(
                "failed to parse get script output (expected component list): {e}"
            ))
        })
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
        let config = self.config()?;

        let mut results = step.prepare_result_map();
        let phases = [
            (ComponentAction::Update, &config.apply_script, State::Updated, State::UpdateFailed),
            (ComponentAction::Delete, &config.remove_script, State::Deleted, State::DeleteFailed),
        ];
        for (action, script, done, failed) in phases {
            let components: Vec<ComponentSpec> = step
                .components
                .iter()
                .filter(|c| c.action == action)
                .map(|c| c.component.clone())
                .collect();
            if components.is_empty() {
                continue;
            }
            let names: Vec<&str> = components.iter().map(|c| c.name.as_str()).collect();
            match self.run_pair(ctx, script, deployment, &components).await {
                Ok(_) => mark_all(&mut results, names, done, ""),
                Err(e) => {
                    error!(error = %e, %script, "script failed");
                    mark_all(&mut results, names, failed, &e.to_string());
                    return Err(ApplyFailure::new(results, e));
                }
            }
        }
        Ok(Some(results))
    }
}

#[async_trait]
impl LegacyComparer for ScriptTargetProvider {
    async fn needs_update(
        &self,
        ctx: &CallContext,
        desired: &[ComponentSpec],
        current: &[ComponentSpec],
    ) -> Result<bool, ProviderError> {
        let script = self.config()?.needs_update;
        if script.is_empty() {
            return Ok(needs_update(desired, current));
        }
        self.compare(ctx, &script, desired, current).await
    }

    async fn needs_remove(
        &self,
        ctx: &CallContext,
        desired: &[ComponentSpec],
        current: &[ComponentSpec],
    ) -> Result<bool, ProviderError> {
        let script = self.config()?.needs_remove;
        if script.is_empty() {
            return Ok(needs_remove(desired, current));
        }
        match self.compare(ctx, &script, desired, current).await {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(error = %e, "needsRemove script failed");
                Err(e)
            }
        }
    }
}

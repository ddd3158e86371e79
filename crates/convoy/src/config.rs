//! Configuration loading and types

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use convoy_core::ReconcileConfig;
use convoy_model::TargetSpec;

/// Top-level configuration read from `convoy.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Default binding config per provider type, binding values win
    #[serde(default)]
    pub providers: BTreeMap<String, HashMap<String, String>>,
    /// Targets registered before every deployment
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            reconcile: ReconcileConfig::default(),
            providers: BTreeMap::new(),
            targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("failed to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("failed to parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Load from an explicit path, then the environment, then default paths
    pub fn load_default(explicit: Option<&Path>) -> eyre::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        if let Ok(path) = std::env::var("CONVOY_CONFIG") {
            let path = PathBuf::from(path);
            return Ok((Self::load(&path)?, Some(path)));
        }

        let mut paths = vec![
            PathBuf::from("convoy.toml"),
            PathBuf::from("/etc/convoy/convoy.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("convoy/convoy.toml"));
        }

        for path in paths {
            if path.exists() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }
}

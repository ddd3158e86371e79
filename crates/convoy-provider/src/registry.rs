//! Provider registry
//!
//! Maps a type tag such as `providers.target.mock` to a constructor. Registries
//! report unknown tags through [`ProviderSource::try_create`] returning
//! `Ok(None)`, which lets several of them be tried in order by a
//! [`ChainedRegistry`]. Direct callers use [`ProviderRegistry::create`], which
//! turns an unknown tag into [`ProviderError::UnknownProviderType`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use convoy_exec::{CommandRunner, LocalRunner};

use crate::bus::MessageBus;
use crate::error::ProviderError;
use crate::http::{self, HttpTargetProvider};
use crate::mock::{self, MockStore, MockTargetProvider};
use crate::mqtt::{self, MqttTargetProvider};
use crate::proxy::{self, ProxyTargetProvider};
use crate::script::{self, ScriptTargetProvider};
use crate::traits::TargetProvider;

/// Builds an uninitialized provider
pub type ProviderConstructor = Arc<dyn Fn() -> Arc<dyn TargetProvider> + Send + Sync>;

/// Something that may know how to build a provider for a type tag
#[async_trait]
pub trait ProviderSource: Send + Sync {
    /// Build and initialize a provider, `Ok(None)` if the tag is not known here
    async fn try_create(
        &self,
        provider_type: &str,
        config: &HashMap<String, String>,
    ) -> Result<Option<Arc<dyn TargetProvider>>, ProviderError>;
}

/// Collaborators handed to the built-in providers
#[derive(Clone)]
pub struct BuiltinDeps {
    /// Store shared by every mock provider this registry builds
    pub mock_store: MockStore,
    /// Bus for every message-bus provider, each connects to its own broker when absent
    pub bus: Option<Arc<dyn MessageBus>>,
    /// Runner for the script provider
    pub runner: Arc<dyn CommandRunner>,
}

impl Default for BuiltinDeps {
    fn default() -> Self {
        Self {
            mock_store: MockStore::new(),
            bus: None,
            runner: Arc::new(LocalRunner::new()),
        }
    }
}

/// Type tag to constructor map
#[derive(Default)]
pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
    init_lock: Mutex<()>,
}

impl ProviderRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in provider
    #[must_use]
    pub fn with_builtin(deps: BuiltinDeps) -> Self {
        let mut registry = Self::new();

        let store = deps.mock_store.clone();
        registry.register(mock::PROVIDER_TYPE, move || {
            Arc::new(MockTargetProvider::new(store.clone()))
        });
        registry.register(http::PROVIDER_TYPE, || Arc::new(HttpTargetProvider::new()));
        registry.register(proxy::PROVIDER_TYPE, || Arc::new(ProxyTargetProvider::new()));
        let runner = Arc::clone(&deps.runner);
        registry.register(script::PROVIDER_TYPE, move || {
            Arc::new(ScriptTargetProvider::new(Arc::clone(&runner)))
        });
        let bus = deps.bus;
        registry.register(mqtt::PROVIDER_TYPE, move || -> Arc<dyn TargetProvider> {
            match &bus {
                Some(bus) => Arc::new(MqttTargetProvider::new(Arc::clone(bus))),
                None => Arc::new(MqttTargetProvider::broker()),
            }
        });

        info!(types = ?registry.types(), "provider registry ready");
        registry
    }

    /// Register or replace the constructor for `provider_type`
    pub fn register<F>(&mut self, provider_type: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn TargetProvider> + Send + Sync + 'static,
    {
        self.constructors
            .insert(provider_type.into(), Arc::new(constructor));
    }

    #[must_use]
    pub fn contains(&self, provider_type: &str) -> bool {
        self.constructors.contains_key(provider_type)
    }

    /// Registered tags, sorted
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }

    fn construct(&self, provider_type: &str) -> Option<Arc<dyn TargetProvider>> {
        let constructor = self.constructors.get(provider_type)?;
        // Held for construction only, never across init I/O
        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        Some(constructor())
    }

    /// Build and initialize a provider, failing on unknown tags
    pub async fn create(
        &self,
        provider_type: &str,
        config: &HashMap<String, String>,
    ) -> Result<Arc<dyn TargetProvider>, ProviderError> {
        self.try_create(provider_type, config)
            .await?
            .ok_or_else(|| ProviderError::UnknownProviderType(provider_type.to_string()))
    }

}

#[async_trait]
impl ProviderSource for ProviderRegistry {
    async fn try_create(
        &self,
        provider_type: &str,
        config: &HashMap<String, String>,
    ) -> Result<Option<Arc<dyn TargetProvider>>, ProviderError> {
        let Some(provider) = self.construct(provider_type) else {
            debug!(provider_type, "type not registered here");
            return Ok(None);
        };
        provider.init_with_map(config).await?;
        Ok(Some(provider))
    }
}

/// Tries several sources in order
#[derive(Default)]
pub struct ChainedRegistry {
    sources: Vec<Arc<dyn ProviderSource>>,
}

impl ChainedRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn ProviderSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// First source that knows the tag wins
    pub async fn create(
        &self,
        provider_type: &str,
        config: &HashMap<String, String>,
    ) -> Result<Arc<dyn TargetProvider>, ProviderError> {
        self.try_create(provider_type, config)
            .await?
            .ok_or_else(|| ProviderError::UnknownProviderType(provider_type.to_string()))
    }
}

#[async_trait]
impl ProviderSource for ChainedRegistry {
    async fn try_create(
        &self,
        provider_type: &str,
        config: &HashMap<String, String>,
    ) -> Result<Option<Arc<dyn TargetProvider>>, ProviderError> {
        for source in &self.sources {
            if let Some(provider) = source.try_create(provider_type, config).await? {
                return Ok(Some(provider));
            }
        }
        Ok(None)
    }
}

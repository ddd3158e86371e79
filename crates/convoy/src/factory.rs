//! Provider factory backed by the built-in registry

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use convoy_core::{CoreError, ProviderFactory};
use convoy_model::{BindingSpec, TargetSpec};
use convoy_provider::{
    BuiltinDeps, ChainedRegistry, ProviderError, ProviderRegistry, ProviderSource, TargetProvider,
};

/// Resolves bindings through the registry after layering per-type defaults
pub struct DefaultProviderFactory {
    registry: ChainedRegistry,
    defaults: BTreeMap<String, HashMap<String, String>>,
}

impl DefaultProviderFactory {
    /// Factory over the built-in providers
    pub fn new(defaults: BTreeMap<String, HashMap<String, String>>) -> Self {
        let builtin: Arc<dyn ProviderSource> =
            Arc::new(ProviderRegistry::with_builtin(BuiltinDeps::default()));
        Self {
            registry: ChainedRegistry::new().with_source(builtin),
            defaults,
        }
    }

    /// Binding config with defaults for its provider type filled in
    fn effective_config(&self, binding: &BindingSpec) -> HashMap<String, String> {
        let mut config = self
            .defaults
            .get(&binding.provider)
            .cloned()
            .unwrap_or_default();
        config.extend(binding.config.clone());
        config
    }
}

#[async_trait]
impl ProviderFactory for DefaultProviderFactory {
    async fn create_provider(
        &self,
        target: &TargetSpec,
        binding: &BindingSpec,
    ) -> Result<Arc<dyn TargetProvider>, CoreError> {
        let config = self.effective_config(binding);
        tracing::info!(
            target_name = %target.name,
            role = %binding.role,
            provider = %binding.provider,
            "creating provider"
        );
        self.registry
            .create(&binding.provider, &config)
            .await
            .map_err(|e| match e {
                ProviderError::UnknownProviderType(_) => CoreError::ConfigError(format!(
                    "target {} binds role '{}' to unknown provider type {}",
                    target.name, binding.role, binding.provider
                )),
                other => other.into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_config_overrides_defaults() {
        let defaults = BTreeMap::from([(
            "providers.target.mock".to_string(),
            HashMap::from([
                ("id".to_string(), "shared".to_string()),
                ("extra".to_string(), "1".to_string()),
            ]),
        )]);
        let factory = DefaultProviderFactory::new(defaults);
        let binding = BindingSpec::new("instance", "providers.target.mock").with_config("id", "own");

        let config = factory.effective_config(&binding);
        assert_eq!(config["id"], "own");
        assert_eq!(config["extra"], "1");
    }

    #[tokio::test]
    async fn test_unknown_type_is_config_error() {
        let factory = DefaultProviderFactory::new(BTreeMap::new());
        let target = TargetSpec::new("edge");
        let binding = BindingSpec::new("instance", "providers.target.nope");

        let err = factory.create_provider(&target, &binding).await.err();
        assert!(matches!(err, Some(CoreError::ConfigError(_))));

        let binding = BindingSpec::new("instance", "providers.target.mock");
        assert!(factory.create_provider(&target, &binding).await.is_ok());
    }

    #[tokio::test]
    async fn test_mqtt_binding_connects_to_its_broker() {
        let defaults = BTreeMap::from([(
            "providers.target.mqtt".to_string(),
            HashMap::from([
                ("clientID".to_string(), "convoy".to_string()),
                ("requestTopic".to_string(), "coa-request".to_string()),
                ("responseTopic".to_string(), "coa-response".to_string()),
            ]),
        )]);
        let factory = DefaultProviderFactory::new(defaults);
        let target = TargetSpec::new("gateway");
        let binding = BindingSpec::new("instance", "providers.target.mqtt")
            .with_config("brokerAddress", "tcp://127.0.0.1:1");

        let err = factory.create_provider(&target, &binding).await.err();
        assert!(
            matches!(err, Some(CoreError::Provider(ProviderError::Transport(_)))),
            "{err:?}"
        );
    }
}

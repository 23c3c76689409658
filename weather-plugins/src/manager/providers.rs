use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{
    error::{DispatchError, InstantiateError, ManagerError, ProviderInitError},
    model::WeatherForecast,
    plugin::{Capability, PluginClass, PluginInstance, WeatherProvider},
    registry::PluginRegistry,
    store::PluginConfig,
};

/// Narrow API for weather providers: pick one, then fetch through it.
#[derive(Debug)]
pub struct WeatherProviderManager {
    registry: Arc<PluginRegistry>,
    providers: RwLock<BTreeMap<String, PluginClass>>,
    active: RwLock<Option<(String, PluginInstance)>>,
}

impl WeatherProviderManager {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            providers: RwLock::new(BTreeMap::new()),
            active: RwLock::new(None),
        }
    }

    /// Rebuilds the provider index from the registry. Returns how many
    /// providers are known.
    pub fn discover(&self) -> usize {
        let found = self.registry.get_by_capability(Capability::WeatherProvider);
        let count = found.len();
        *self.providers.write() = found;
        debug!(count, "discovered weather providers");
        count
    }

    pub fn available(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    pub fn class(&self, name: &str) -> Option<PluginClass> {
        self.providers.read().get(name).cloned()
    }

    /// Returns the live provider `name`, building it if needed. `config`
    /// is merged over the stored settings for this call only.
    pub fn create(
        &self,
        name: &str,
        config: PluginConfig,
    ) -> Result<Arc<dyn WeatherProvider>, ProviderInitError> {
        self.instance(name, config)?
            .as_provider()
            .ok_or_else(|| wrong_capability(name))
    }

    fn instance(&self, name: &str, config: PluginConfig) -> Result<PluginInstance, ProviderInitError> {
        let fail = |source| ProviderInitError { name: name.to_string(), source };

        if !self.providers.read().contains_key(name) {
            return Err(match self.registry.class(name) {
                Some(class) if class.capability() != Capability::WeatherProvider => wrong_capability(name),
                _ => fail(InstantiateError::Unknown(name.to_string())),
            });
        }

        self.registry.instantiate(name, config).map_err(fail)
    }

    /// Makes `name` the target of every later fetch.
    pub fn set_active(&self, name: &str, config: PluginConfig) -> Result<(), ProviderInitError> {
        let instance = self.instance(name, config)?;
        if instance.as_provider().is_none() {
            return Err(wrong_capability(name));
        }

        *self.active.write() = Some((name.to_string(), instance));
        info!(provider = name, "active weather provider set");
        Ok(())
    }

    pub fn active_name(&self) -> Option<String> {
        self.active.read().as_ref().map(|(name, _)| name.clone())
    }

    pub fn clear_active(&self) {
        self.active.write().take();
    }

    /// Resolves the active provider and checks it may still be invoked.
    /// A provider rebuilt by the registry since `set_active` replaces the
    /// cached handle.
    fn target(&self) -> Result<Arc<dyn WeatherProvider>, ManagerError> {
        let Some((name, cached)) = self.active.read().clone() else {
            return Err(ManagerError::NoActiveProvider);
        };

        self.registry.ensure_enabled(&name)?;

        let instance = match self.registry.get(&name) {
            Some(live) if !live.same_as(&cached) => {
                debug!(provider = %name, "active provider was rebuilt, switching to the new instance");
                *self.active.write() = Some((name.clone(), live.clone()));
                live
            }
            _ => cached,
        };

        instance
            .as_provider()
            .ok_or(ManagerError::Dispatch(DispatchError::NotLoaded(name)))
    }

    pub async fn get_current_weather(&self, location: &str) -> Result<WeatherForecast, ManagerError> {
        let provider = self.target()?;
        provider.get_current_weather(location).await.map_err(ManagerError::Fetch)
    }

    pub async fn get_forecast(&self, location: &str, days: u32) -> Result<WeatherForecast, ManagerError> {
        let provider = self.target()?;
        provider.get_forecast(location, days).await.map_err(ManagerError::Fetch)
    }
}

fn wrong_capability(name: &str) -> ProviderInitError {
    ProviderInitError {
        name: name.to_string(),
        source: InstantiateError::WrongCapability {
            name: name.to_string(),
            expected: Capability::WeatherProvider,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::InitError,
        store::ConfigStore,
        test_support::{self, Probe},
    };
    use serde_json::json;

    fn setup(dir: &tempfile::TempDir) -> (Arc<PluginRegistry>, WeatherProviderManager) {
        let registry = Arc::new(PluginRegistry::with_store(ConfigStore::new(dir.path().join("plugins.json"))));
        let manager = WeatherProviderManager::new(Arc::clone(&registry));
        (registry, manager)
    }

    #[test]
    fn discover_only_sees_providers() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, manager) = setup(&dir);
        registry.register(test_support::provider_class("alpha")).unwrap();
        registry.register(test_support::feature_class("notes", "Tools", false, Probe::new())).unwrap();

        assert_eq!(manager.discover(), 1);
        assert_eq!(manager.available(), ["alpha"]);
        assert!(manager.class("notes").is_none());

        let err = manager.create("notes", PluginConfig::new()).unwrap_err();
        assert!(matches!(err.source, InstantiateError::WrongCapability { .. }));
    }

    #[test]
    fn alpha_and_beta_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, manager) = setup(&dir);
        registry.register(test_support::provider_class("alpha")).unwrap();
        let _ = registry.register(test_support::failing_provider_class("beta"));

        assert!(registry.is_registered("alpha") && registry.is_registered("beta"));
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("beta").is_none());

        manager.discover();
        let err = manager.create("beta", PluginConfig::new()).err().unwrap();

        assert_eq!(err.name, "beta");
        assert!(matches!(
            err.source,
            InstantiateError::Construction { source: InitError::MissingSetting { .. }, .. }
        ));
        assert!(err.to_string().contains("requires `api_key`"));
    }

    #[test]
    fn create_unknown_provider_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (_registry, manager) = setup(&dir);
        manager.discover();

        let err = manager.create("gamma", PluginConfig::new()).err().unwrap();
        assert!(matches!(err.source, InstantiateError::Unknown(_)));
    }

    #[tokio::test]
    async fn fetch_before_set_active_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (_registry, manager) = setup(&dir);

        let err = manager.get_current_weather("Oslo").await.unwrap_err();
        assert!(matches!(err, ManagerError::NoActiveProvider));
        assert!(matches!(manager.get_forecast("Oslo", 3).await, Err(ManagerError::NoActiveProvider)));
    }

    #[tokio::test]
    async fn dispatches_to_active_provider() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, manager) = setup(&dir);
        let probe = Probe::new();
        registry.register(test_support::probed_provider_class("alpha", probe.clone())).unwrap();
        manager.discover();

        manager.set_active("alpha", PluginConfig::new()).unwrap();
        assert_eq!(manager.active_name().as_deref(), Some("alpha"));

        let current = manager.get_current_weather("Oslo").await.unwrap();
        assert_eq!(current.location, "Oslo");
        assert!(current.hourly.is_empty());

        let forecast = manager.get_forecast("Oslo", 1).await.unwrap();
        assert_eq!(forecast.daily.len(), 1);
        assert_eq!(probe.fetches(), 2);

        manager.clear_active();
        assert!(manager.active_name().is_none());
    }

    #[tokio::test]
    async fn fetch_errors_pass_through_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, manager) = setup(&dir);
        registry.register(test_support::provider_class("alpha")).unwrap();
        manager.discover();
        manager.set_active("alpha", PluginConfig::new()).unwrap();

        let err = manager.get_current_weather("").await.unwrap_err();
        assert!(matches!(err, ManagerError::Fetch(_)));
        assert_eq!(err.to_string(), "alpha: location must not be empty");
    }

    #[tokio::test]
    async fn disabled_provider_is_not_invoked() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, manager) = setup(&dir);
        let probe = Probe::new();
        registry.register(test_support::probed_provider_class("alpha", probe.clone())).unwrap();
        manager.discover();
        manager.set_active("alpha", PluginConfig::new()).unwrap();

        registry.set_enabled("alpha", false).unwrap();
        let err = manager.get_current_weather("Oslo").await.unwrap_err();

        assert!(matches!(err, ManagerError::Dispatch(DispatchError::Disabled(_))));
        assert_eq!(probe.fetches(), 0);

        // re-enabling builds a new instance; dispatch follows it
        registry.set_enabled("alpha", true).unwrap();
        manager.get_current_weather("Oslo").await.unwrap();
        assert_eq!(probe.fetches(), 1);
        assert_eq!(probe.constructed(), 2);
    }

    #[test]
    fn set_active_with_config_reaches_the_provider() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, manager) = setup(&dir);
        let _ = registry.register(test_support::failing_provider_class("beta"));
        manager.discover();

        assert!(manager.set_active("beta", PluginConfig::new()).is_err());
        assert!(manager.active_name().is_none());

        let config = json!({ "api_key": "0123456789" }).as_object().cloned().unwrap();
        manager.set_active("beta", config).unwrap();
        assert_eq!(manager.active_name().as_deref(), Some("beta"));
    }
}

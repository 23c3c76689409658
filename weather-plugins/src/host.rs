//! Start-up and shutdown of the whole plugin runtime.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::{
    builtin::builtin_catalog,
    config::HostConfig,
    error::{ManagerError, ProviderInitError},
    legacy::WorkerPool,
    loader::PluginLoader,
    manager::{FeatureManager, WeatherProviderManager},
    model::WeatherForecast,
    plugin::{Capability, PluginClass},
    registry::{LoadReport, PluginRegistry},
    store::{ConfigStore, PluginConfig},
};

/// One registry, its two typed managers and the worker pool shared by
/// blocking providers.
#[derive(Debug)]
pub struct PluginHost {
    config: HostConfig,
    pool: WorkerPool,
    registry: Arc<PluginRegistry>,
    providers: WeatherProviderManager,
    features: FeatureManager,
}

impl PluginHost {
    pub fn new(config: HostConfig) -> Result<Self> {
        let pool = config.worker_pool();
        let store = ConfigStore::new(config.plugin_config_path()?);
        let loader = PluginLoader::new(config.plugin_dirs.clone(), builtin_catalog(&pool));
        let registry = Arc::new(PluginRegistry::new(loader, store));

        Ok(Self {
            providers: WeatherProviderManager::new(Arc::clone(&registry)),
            features: FeatureManager::new(Arc::clone(&registry)),
            config,
            pool,
            registry,
        })
    }

    /// Loads descriptors, registers built-ins that no descriptor selected,
    /// activates enabled features and selects the default provider.
    pub fn start(&self) -> LoadReport {
        let mut report = self.registry.load_plugins();

        if self.config.register_builtins {
            let missing: Vec<PluginClass> = self
                .registry
                .loader()
                .catalog()
                .iter()
                .filter(|class| !self.registry.is_registered(class.name()))
                .cloned()
                .collect();

            for class in missing {
                let name = class.name().to_string();
                if self.registry.register(class).is_err() && self.registry.is_registered(&name) {
                    report.uninstantiated.push(name.clone());
                }
                debug!(plugin = %name, "registered built-in plugin");
            }
        }

        self.providers.discover();
        self.features.discover();

        for name in self.features.available() {
            if self.registry.is_live(&name) {
                self.features.activate(&name);
            }
        }

        if let Some(name) = self.config.default_provider.as_deref() {
            if let Err(err) = self.select_provider(name) {
                warn!(provider = name, "default provider unavailable: {err}");
            }
        }

        info!(
            providers = self.providers.available().len(),
            features = self.features.active_names().len(),
            "plugin host started"
        );
        report
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn providers(&self) -> &WeatherProviderManager {
        &self.providers
    }

    pub fn features(&self) -> &FeatureManager {
        &self.features
    }

    pub fn select_provider(&self, name: &str) -> Result<(), ProviderInitError> {
        self.providers.set_active(name, PluginConfig::new())
    }

    /// Current weather (`days == None`) or a forecast from the active
    /// provider, handed to every active feature on success.
    pub async fn fetch(&self, location: &str, days: Option<u32>) -> Result<WeatherForecast, ManagerError> {
        let forecast = match days {
            Some(days) => self.providers.get_forecast(location, days).await?,
            None => self.providers.get_current_weather(location).await?,
        };

        let seen = self.features.publish_forecast(&forecast);
        debug!(location, features = seen, "forecast published");
        Ok(forecast)
    }

    /// Registered classes with the given capability, by name.
    pub fn classes_of(&self, capability: Capability) -> Vec<PluginClass> {
        self.registry.get_by_capability(capability).into_values().collect()
    }

    pub fn shutdown(&self) {
        self.features.deactivate_all();
        self.providers.clear_active();
        self.registry.shutdown();
        self.pool.close();
        info!("plugin host stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, Probe};
    use std::fs;

    fn host_config(dir: &tempfile::TempDir, builtins: bool) -> HostConfig {
        HostConfig {
            plugin_dirs: vec![dir.path().join("plugins")],
            plugin_config: Some(dir.path().join("plugins.json")),
            register_builtins: builtins,
            ..HostConfig::default()
        }
    }

    #[test]
    fn descriptors_select_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        fs::create_dir_all(&plugins).unwrap();
        fs::write(plugins.join("meteo.toml"), "PLUGIN_CLASS = \"openmeteo\"\n").unwrap();
        fs::write(plugins.join("history.toml"), "PLUGIN_CLASS = \"history\"\ncapability = \"feature\"\n").unwrap();
        fs::write(plugins.join("broken.toml"), "capability = \"feature\"\n").unwrap();

        let host = PluginHost::new(host_config(&dir, false)).unwrap();
        let report = host.start();

        assert_eq!(report.summary(), "2 plugins loaded, 1 failed");
        assert_eq!(host.providers().available(), ["openmeteo"]);
        assert_eq!(host.features().active_names(), ["history"]);
        assert!(!host.registry().is_registered("weatherapi"));
        host.shutdown();
    }

    #[test]
    fn builtins_fill_in_without_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let host = PluginHost::new(host_config(&dir, true)).unwrap();
        let report = host.start();

        assert!(report.loaded.is_empty());
        assert_eq!(host.providers().available(), ["openmeteo", "openweather", "weatherapi"]);
        assert!(host.registry().is_live("openmeteo"));
        assert!(host.registry().is_live("history"));
        assert_eq!(host.classes_of(Capability::Feature).len(), 1);
        host.shutdown();
    }

    #[test]
    fn unusable_default_provider_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = host_config(&dir, false);
        config.set_default_provider("nowhere");

        let host = PluginHost::new(config).unwrap();
        host.start();
        assert!(host.providers().active_name().is_none());
    }

    #[tokio::test]
    async fn fetch_reaches_active_features() {
        let dir = tempfile::tempdir().unwrap();
        let host = PluginHost::new(host_config(&dir, false)).unwrap();
        host.start();

        let probe = Probe::new();
        host.registry().register(test_support::provider_class("alpha")).unwrap();
        host.registry().register(test_support::feature_class("notes", "Tools", false, probe.clone())).unwrap();
        host.providers().discover();
        host.features().discover();
        assert!(host.features().activate("notes"));

        assert!(matches!(host.fetch("Oslo", None).await, Err(ManagerError::NoActiveProvider)));

        host.select_provider("alpha").unwrap();
        let current = host.fetch("Oslo", None).await.unwrap();
        assert!(current.hourly.is_empty());
        let forecast = host.fetch("Oslo", Some(1)).await.unwrap();
        assert_eq!(forecast.daily.len(), 1);
        assert_eq!(probe.forecasts_seen(), 2);

        assert!(host.fetch("", None).await.is_err());
        assert_eq!(probe.forecasts_seen(), 2);
    }

    #[tokio::test]
    async fn shutdown_tears_everything_down() {
        let dir = tempfile::tempdir().unwrap();
        let host = PluginHost::new(host_config(&dir, false)).unwrap();
        let probe = Probe::new();
        host.registry().register(test_support::probed_provider_class("alpha", probe.clone())).unwrap();
        host.providers().discover();
        host.select_provider("alpha").unwrap();

        host.shutdown();

        assert_eq!(probe.cleanups(), 1);
        assert!(host.providers().active_name().is_none());
        assert!(host.registry().get("alpha").is_none());
        assert!(host.pool().is_closed());
    }
}

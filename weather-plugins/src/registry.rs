//! The canonical set of plugin classes and their live instances.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
    error::{DispatchError, InitError, InstantiateError, LoadError, RegistrationError, StoreError},
    loader::PluginLoader,
    plugin::{Capability, PluginCatalog, PluginClass, PluginInstance},
    store::{self, ConfigDocument, ConfigStore, ENABLED_KEY, PluginConfig},
};

/// Outcome of one [`PluginRegistry::load_plugins`] pass.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Classes newly registered from descriptors.
    pub loaded: Vec<String>,
    /// Descriptors that could not be loaded.
    pub failed: Vec<LoadError>,
    /// Registered classes whose instance could not be built.
    pub uninstantiated: Vec<String>,
}

impl LoadReport {
    pub fn summary(&self) -> String {
        format!("{} plugins loaded, {} failed", self.loaded.len(), self.failed.len())
    }
}

/// Owns plugin classes, at most one live instance per class, and the
/// in-memory copy of the plugin config document.
///
/// Nothing here is global: the host builds one registry at start-up and
/// calls [`PluginRegistry::shutdown`] when it stops.
#[derive(Debug)]
pub struct PluginRegistry {
    loader: PluginLoader,
    store: ConfigStore,
    classes: RwLock<BTreeMap<String, PluginClass>>,
    instances: RwLock<HashMap<String, PluginInstance>>,
    configs: Mutex<ConfigDocument>,
}

impl PluginRegistry {
    pub fn new(loader: PluginLoader, store: ConfigStore) -> Self {
        let configs = store.load();
        info!(
            dirs = ?loader.dirs(),
            config = %store.path().display(),
            "initializing plugin registry"
        );

        Self {
            loader,
            store,
            classes: RwLock::new(BTreeMap::new()),
            instances: RwLock::new(HashMap::new()),
            configs: Mutex::new(configs),
        }
    }

    /// Registry with no plugin directories.
    pub fn with_store(store: ConfigStore) -> Self {
        Self::new(PluginLoader::new(Vec::new(), PluginCatalog::new()), store)
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Scans the loader's directories and registers every class found.
    /// A bad descriptor is logged and skipped; it never stops the scan.
    pub fn load_plugins(&self) -> LoadReport {
        let mut report = LoadReport::default();

        if self.loader.dirs().is_empty() {
            warn!("no plugin directories configured");
            return report;
        }

        for path in self.loader.scan() {
            let class = match self.loader.load(&path) {
                Ok(class) => class,
                Err(err) => {
                    error!(path = %path.display(), "{err}");
                    report.failed.push(err);
                    continue;
                }
            };

            let name = class.name().to_string();
            match self.register(class) {
                Ok(()) => report.loaded.push(name),
                Err(RegistrationError::ConstructionFailed { .. }) => {
                    report.loaded.push(name.clone());
                    report.uninstantiated.push(name);
                }
                Err(RegistrationError::DuplicateName(_)) => {}
            }
        }

        info!("{}", report.summary());
        report
    }

    /// Adds a class and tries to build its instance.
    ///
    /// A duplicate name is rejected without touching the existing entry. A
    /// construction failure leaves the class registered but instance-less.
    /// Both are logged here; callers may ignore the result.
    pub fn register(&self, class: PluginClass) -> Result<(), RegistrationError> {
        let name = class.name().to_string();

        {
            let mut classes = self.classes.write();
            if classes.contains_key(&name) {
                warn!(plugin = %name, "plugin already registered, skipping");
                return Err(RegistrationError::DuplicateName(name));
            }
            classes.insert(name.clone(), class.clone());
        }

        info!(
            plugin = %name,
            version = %class.metadata().version,
            capability = %class.capability(),
            "registered plugin"
        );

        let config = self.effective_config(&class);
        if !store::is_enabled(&config) {
            info!(plugin = %name, "plugin is disabled, not instantiating");
            return Ok(());
        }

        self.spawn(&class, &config)
            .map_err(|source| RegistrationError::ConstructionFailed { name, source })
    }

    /// Builds and stores the instance of `class`; logs a failure.
    fn spawn(&self, class: &PluginClass, config: &PluginConfig) -> Result<(), InitError> {
        if let Err(err) = class.schema().validate(config) {
            warn!(plugin = class.name(), "configuration does not match schema: {err}");
        }

        match class.instantiate(config) {
            Ok(instance) => {
                self.instances.write().insert(class.name().to_string(), instance);
                debug!(plugin = class.name(), "created plugin instance");
                Ok(())
            }
            Err(err) => {
                error!(plugin = class.name(), "failed to create plugin instance: {err}");
                Err(err)
            }
        }
    }

    /// Live instance, if any.
    pub fn get(&self, name: &str) -> Option<PluginInstance> {
        self.instances.read().get(name).cloned()
    }

    pub fn class(&self, name: &str) -> Option<PluginClass> {
        self.classes.read().get(name).cloned()
    }

    pub fn classes(&self) -> Vec<PluginClass> {
        self.classes.read().values().cloned().collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.instances.read().contains_key(name)
    }

    pub fn get_by_capability(&self, capability: Capability) -> BTreeMap<String, PluginClass> {
        self.classes
            .read()
            .iter()
            .filter(|(_, class)| class.capability() == capability)
            .map(|(name, class)| (name.clone(), class.clone()))
            .collect()
    }

    /// Stored config exactly as persisted.
    pub fn stored_config(&self, plugin_id: &str) -> PluginConfig {
        self.configs.lock().get(plugin_id).cloned().unwrap_or_default()
    }

    /// Stored config with the class's schema defaults filled in.
    pub fn get_config(&self, plugin_id: &str) -> PluginConfig {
        let stored = self.stored_config(plugin_id);
        match self.class(plugin_id) {
            Some(class) => ConfigStore::apply_defaults(&class, stored),
            None => stored,
        }
    }

    fn effective_config(&self, class: &PluginClass) -> PluginConfig {
        ConfigStore::apply_defaults(class, self.stored_config(class.name()))
    }

    /// Replaces a plugin's stored config and writes the whole document.
    ///
    /// On success the live instance (if any) is told through
    /// `on_config_changed`. Setting `_enabled` to false unloads the
    /// instance; setting it back builds one again.
    pub fn set_config(&self, plugin_id: &str, config: PluginConfig) -> Result<(), StoreError> {
        {
            let mut doc = self.configs.lock();
            let mut next = doc.clone();
            next.insert(plugin_id.to_string(), config);
            if let Err(err) = self.store.save(&next) {
                error!(plugin = plugin_id, "{err}");
                return Err(err);
            }
            *doc = next;
        }

        let Some(class) = self.class(plugin_id) else {
            debug!(plugin = plugin_id, "stored config for a plugin that is not registered");
            return Ok(());
        };

        let effective = self.effective_config(&class);
        let enabled = store::is_enabled(&effective);

        match self.get(plugin_id) {
            Some(_) if !enabled => {
                info!(plugin = plugin_id, "plugin disabled");
                self.unload(plugin_id);
            }
            Some(instance) => {
                if let Err(err) = instance.on_config_changed(&effective) {
                    warn!(plugin = plugin_id, "plugin rejected configuration change: {err:#}");
                }
            }
            None if enabled => {
                // a failure is logged by spawn; the class stays instance-less
                let _ = self.spawn(&class, &effective);
            }
            None => {}
        }

        Ok(())
    }

    /// Updates only the reserved `_enabled` flag.
    pub fn set_enabled(&self, plugin_id: &str, enabled: bool) -> Result<(), StoreError> {
        let mut config = self.stored_config(plugin_id);
        config.insert(ENABLED_KEY.to_string(), enabled.into());
        self.set_config(plugin_id, config)
    }

    pub fn is_enabled(&self, plugin_id: &str) -> bool {
        store::is_enabled(&self.stored_config(plugin_id))
    }

    /// Gate checked before every invocation of a plugin.
    pub fn ensure_enabled(&self, name: &str) -> Result<(), DispatchError> {
        if !self.is_enabled(name) {
            return Err(DispatchError::Disabled(name.to_string()));
        }
        if !self.is_live(name) {
            return Err(DispatchError::NotLoaded(name.to_string()));
        }
        Ok(())
    }

    /// Explicit single-target instantiation.
    ///
    /// Reuses the live instance (handing it the merged config when
    /// `overrides` is non-empty) or builds a new one. Overrides are not
    /// persisted. Unlike [`register`](Self::register), failures are returned.
    pub fn instantiate(
        &self,
        name: &str,
        overrides: PluginConfig,
    ) -> Result<PluginInstance, InstantiateError> {
        let class = self
            .class(name)
            .ok_or_else(|| InstantiateError::Unknown(name.to_string()))?;

        let has_overrides = !overrides.is_empty();
        let mut config = self.stored_config(name);
        config.extend(overrides);
        let config = ConfigStore::apply_defaults(&class, config);

        if !store::is_enabled(&config) {
            return Err(InstantiateError::Disabled(name.to_string()));
        }

        let construction = |source| InstantiateError::Construction { name: name.to_string(), source };

        if let Some(instance) = self.get(name) {
            if has_overrides {
                instance
                    .on_config_changed(&config)
                    .map_err(|err| construction(InitError::Other(err)))?;
            }
            return Ok(instance);
        }

        let instance = class.instantiate(&config).map_err(construction)?;

        let mut instances = self.instances.write();
        let existing = instances.get(name).cloned();
        if let Some(existing) = existing {
            // lost a race with another instantiation; keep the first
            drop(instances);
            instance.cleanup();
            return Ok(existing);
        }
        instances.insert(name.to_string(), instance.clone());
        debug!(plugin = name, "created plugin instance on request");

        Ok(instance)
    }

    /// Cleans up and drops the live instance; the class stays registered.
    /// Returns whether an instance was unloaded.
    pub fn unload(&self, name: &str) -> bool {
        let removed = self.instances.write().remove(name);

        match removed {
            Some(instance) => {
                instance.cleanup();
                info!(plugin = name, "unloaded plugin");
                true
            }
            None => {
                debug!(plugin = name, "no live instance to unload");
                false
            }
        }
    }

    pub fn unload_all(&self) {
        let names: Vec<String> = self.instances.read().keys().cloned().collect();
        for name in names {
            self.unload(&name);
        }
    }

    pub fn shutdown(&self) {
        self.unload_all();
        info!("plugin registry shut down");
    }

    /// Paths of every descriptor directory, for diagnostics.
    pub fn plugin_dirs(&self) -> Vec<PathBuf> {
        self.loader.dirs().to_vec()
    }
}

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{
    error::DispatchError,
    model::WeatherForecast,
    plugin::{Capability, Feature, FeatureAction, PluginClass, PluginInstance},
    registry::PluginRegistry,
    store::PluginConfig,
};

/// Tracks which feature plugins are switched on and collects what they
/// contribute to the host's menus and toolbar.
#[derive(Debug)]
pub struct FeatureManager {
    registry: Arc<PluginRegistry>,
    features: RwLock<BTreeMap<String, PluginClass>>,
    active: RwLock<BTreeMap<String, Arc<dyn Feature>>>,
}

impl FeatureManager {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            features: RwLock::new(BTreeMap::new()),
            active: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn discover(&self) -> usize {
        let found = self.registry.get_by_capability(Capability::Feature);
        let count = found.len();
        *self.features.write() = found;
        debug!(count, "discovered features");
        count
    }

    pub fn available(&self) -> Vec<String> {
        self.features.read().keys().cloned().collect()
    }

    /// Switches a feature on. Failures are logged and reported as `false`.
    pub fn activate(&self, name: &str) -> bool {
        if self.is_active(name) {
            return true;
        }
        if !self.features.read().contains_key(name) {
            warn!(feature = name, "cannot activate unknown feature");
            return false;
        }

        let feature = match self.registry.instantiate(name, PluginConfig::new()) {
            Ok(instance) => match instance.as_feature() {
                Some(feature) => feature,
                None => {
                    warn!(feature = name, "plugin is not a feature");
                    return false;
                }
            },
            Err(err) => {
                warn!(feature = name, "cannot activate feature: {err}");
                return false;
            }
        };

        if let Err(err) = feature.on_activate() {
            warn!(feature = name, "feature failed to activate: {err:#}");
            return false;
        }

        self.active.write().insert(name.to_string(), feature);
        info!(feature = name, "feature activated");
        true
    }

    pub fn deactivate(&self, name: &str) -> bool {
        let Some(feature) = self.active.write().remove(name) else {
            return false;
        };

        feature.on_deactivate();
        info!(feature = name, "feature deactivated");
        true
    }

    pub fn deactivate_all(&self) {
        let active = std::mem::take(&mut *self.active.write());
        for (name, feature) in active {
            feature.on_deactivate();
            debug!(feature = %name, "feature deactivated");
        }
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.read().contains_key(name)
    }

    pub fn active_names(&self) -> Vec<String> {
        self.active.read().keys().cloned().collect()
    }

    /// Active features that may still be invoked.
    ///
    /// A feature the registry rebuilt since activation (disable then enable)
    /// is swapped for the live instance, which gets `on_activate`. A disabled
    /// feature is skipped but stays active; one unloaded while enabled is
    /// dropped.
    fn dispatchable(&self) -> Vec<(String, Arc<dyn Feature>)> {
        let snapshot: Vec<(String, Arc<dyn Feature>)> = self
            .active
            .read()
            .iter()
            .map(|(name, feature)| (name.clone(), Arc::clone(feature)))
            .collect();

        snapshot
            .into_iter()
            .filter_map(|(name, cached)| self.resolve(name, cached))
            .collect()
    }

    fn resolve(&self, name: String, cached: Arc<dyn Feature>) -> Option<(String, Arc<dyn Feature>)> {
        match self.registry.ensure_enabled(&name) {
            Ok(()) => {}
            Err(err @ DispatchError::Disabled(_)) => {
                debug!(feature = %name, "skipping feature: {err}");
                return None;
            }
            Err(err @ DispatchError::NotLoaded(_)) => {
                debug!(feature = %name, "dropping feature: {err}");
                self.active.write().remove(&name);
                return None;
            }
        }

        let live = self.registry.get(&name)?;
        if live.same_as(&PluginInstance::Feature(Arc::clone(&cached))) {
            return Some((name, cached));
        }

        let Some(fresh) = live.as_feature() else {
            self.active.write().remove(&name);
            return None;
        };
        if let Err(err) = fresh.on_activate() {
            warn!(feature = %name, "rebuilt feature failed to activate: {err:#}");
            self.active.write().remove(&name);
            return None;
        }

        debug!(feature = %name, "feature was rebuilt, switching to the new instance");
        self.active.write().insert(name.clone(), Arc::clone(&fresh));
        Some((name, fresh))
    }

    /// Menu entries of every active feature, grouped by category. A feature
    /// without its own entries gets one named after it.
    pub fn menu_actions(&self) -> BTreeMap<String, Vec<FeatureAction>> {
        let mut menus: BTreeMap<String, Vec<FeatureAction>> = BTreeMap::new();

        for (name, feature) in self.dispatchable() {
            if !feature.add_to_menu() {
                continue;
            }
            let mut actions = feature.menu_actions();
            if actions.is_empty() {
                actions.push(FeatureAction::new(name.clone(), name));
            }
            menus.entry(feature.category().to_string()).or_default().extend(actions);
        }

        menus
    }

    pub fn toolbar_actions(&self) -> Vec<FeatureAction> {
        self.dispatchable()
            .into_iter()
            .filter(|(_, feature)| feature.add_to_toolbar())
            .flat_map(|(name, feature)| {
                let actions = feature.toolbar_actions();
                if actions.is_empty() {
                    vec![FeatureAction::new(name.clone(), name)]
                } else {
                    actions
                }
            })
            .collect()
    }

    /// Hands a fetched forecast to every active feature. Returns how many
    /// saw it.
    pub fn publish_forecast(&self, forecast: &WeatherForecast) -> usize {
        let targets = self.dispatchable();
        for (_, feature) in &targets {
            feature.on_forecast(forecast);
        }
        targets.len()
    }
}

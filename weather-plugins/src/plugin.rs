//! The capability contract every plugin satisfies.
//!
//! A plugin class is metadata + a config schema + a factory; an instance is
//! one of the role objects below. Roles are composed from the small
//! [`Plugin`] lifecycle trait rather than a base-class hierarchy.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::InitError,
    model::WeatherForecast,
    schema::ConfigSchema,
    store::PluginConfig,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub author: String,
    pub version: String,
    pub description: String,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            author: "Unknown".to_string(),
            version: "0.1.0".to_string(),
            description: "No description provided".to_string(),
        }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Which typed manager a plugin class belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    WeatherProvider,
    Feature,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::WeatherProvider => "weather_provider",
            Capability::Feature => "feature",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Capability {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().replace('-', "_").as_str() {
            "weather_provider" | "provider" => Ok(Capability::WeatherProvider),
            "feature" => Ok(Capability::Feature),
            _ => Err(anyhow::anyhow!(
                "Unknown capability '{value}'. Supported capabilities: weather_provider, feature."
            )),
        }
    }
}

/// Lifecycle hooks shared by every plugin role.
///
/// Methods take `&self`: instances are shared behind `Arc` and keep any
/// mutable state behind their own locks.
pub trait Plugin: Send + Sync + fmt::Debug {
    /// Called once after construction. An `Err` means the instance is
    /// discarded and the class stays known but uninstantiated.
    fn initialize(&self) -> Result<(), InitError> {
        Ok(())
    }

    fn cleanup(&self) {}

    /// Receives the full, defaulted config after every change. Returning an
    /// error keeps the instance alive with its previous state.
    fn on_config_changed(&self, config: &PluginConfig) -> anyhow::Result<()> {
        let _ = config;
        Ok(())
    }
}

#[async_trait]
pub trait WeatherProvider: Plugin {
    /// `location` is a place name or `"lat,lon"`.
    async fn get_current_weather(&self, location: &str) -> anyhow::Result<WeatherForecast>;

    async fn get_forecast(&self, location: &str, days: u32) -> anyhow::Result<WeatherForecast>;
}

/// A menu entry or toolbar button contributed by a feature, independent of
/// any UI toolkit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureAction {
    pub id: String,
    pub label: String,
    pub icon: Option<String>,
}

impl FeatureAction {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self { id: id.into(), label: label.into(), icon: None }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

pub trait Feature: Plugin {
    fn category(&self) -> &str {
        "Uncategorized"
    }

    fn add_to_menu(&self) -> bool {
        true
    }

    fn add_to_toolbar(&self) -> bool {
        false
    }

    /// Empty means "one entry named after the plugin".
    fn menu_actions(&self) -> Vec<FeatureAction> {
        Vec::new()
    }

    fn toolbar_actions(&self) -> Vec<FeatureAction> {
        Vec::new()
    }

    fn on_activate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_deactivate(&self) {}

    /// Sees every forecast the host fetched while the feature is active.
    fn on_forecast(&self, forecast: &WeatherForecast) {
        let _ = forecast;
    }
}

/// A live plugin object, tagged with its role.
#[derive(Debug, Clone)]
pub enum PluginInstance {
    Provider(Arc<dyn WeatherProvider>),
    Feature(Arc<dyn Feature>),
}

impl PluginInstance {
    pub fn capability(&self) -> Capability {
        match self {
            PluginInstance::Provider(_) => Capability::WeatherProvider,
            PluginInstance::Feature(_) => Capability::Feature,
        }
    }

    pub fn as_provider(&self) -> Option<Arc<dyn WeatherProvider>> {
        match self {
            PluginInstance::Provider(p) => Some(Arc::clone(p)),
            PluginInstance::Feature(_) => None,
        }
    }

    pub fn as_feature(&self) -> Option<Arc<dyn Feature>> {
        match self {
            PluginInstance::Feature(f) => Some(Arc::clone(f)),
            PluginInstance::Provider(_) => None,
        }
    }

    pub fn initialize(&self) -> Result<(), InitError> {
        match self {
            PluginInstance::Provider(p) => p.initialize(),
            PluginInstance::Feature(f) => f.initialize(),
        }
    }

    pub fn cleanup(&self) {
        match self {
            PluginInstance::Provider(p) => p.cleanup(),
            PluginInstance::Feature(f) => f.cleanup(),
        }
    }

    pub fn on_config_changed(&self, config: &PluginConfig) -> anyhow::Result<()> {
        match self {
            PluginInstance::Provider(p) => p.on_config_changed(config),
            PluginInstance::Feature(f) => f.on_config_changed(config),
        }
    }

    /// Whether both handles point at the same object.
    pub fn same_as(&self, other: &PluginInstance) -> bool {
        match (self, other) {
            (PluginInstance::Provider(a), PluginInstance::Provider(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (PluginInstance::Feature(a), PluginInstance::Feature(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

pub type PluginFactory =
    Arc<dyn Fn(&PluginConfig) -> Result<PluginInstance, InitError> + Send + Sync>;

/// Type-level description of a plugin: what it is, how it is configured and
/// how to build it.
#[derive(Clone)]
pub struct PluginClass {
    id: String,
    metadata: PluginMetadata,
    capability: Capability,
    schema: ConfigSchema,
    factory: PluginFactory,
}

impl PluginClass {
    pub fn provider<P, F>(
        id: impl Into<String>,
        metadata: PluginMetadata,
        schema: ConfigSchema,
        build: F,
    ) -> Self
    where
        P: WeatherProvider + 'static,
        F: Fn(&PluginConfig) -> Result<P, InitError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            metadata,
            capability: Capability::WeatherProvider,
            schema,
            factory: Arc::new(move |config| {
                let provider: Arc<dyn WeatherProvider> = Arc::new(build(config)?);
                Ok(PluginInstance::Provider(provider))
            }),
        }
    }

    pub fn feature<P, F>(
        id: impl Into<String>,
        metadata: PluginMetadata,
        schema: ConfigSchema,
        build: F,
    ) -> Self
    where
        P: Feature + 'static,
        F: Fn(&PluginConfig) -> Result<P, InitError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            metadata,
            capability: Capability::Feature,
            schema,
            factory: Arc::new(move |config| {
                let feature: Arc<dyn Feature> = Arc::new(build(config)?);
                Ok(PluginInstance::Feature(feature))
            }),
        }
    }

    /// Catalog key; what a descriptor's `PLUGIN_CLASS` refers to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registry key.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    /// Builds an instance and runs its `initialize` hook. `config` is
    /// expected to be defaulted already.
    pub fn instantiate(&self, config: &PluginConfig) -> Result<PluginInstance, InitError> {
        let instance = (self.factory)(config)?;
        instance.initialize()?;
        Ok(instance)
    }
}

impl fmt::Debug for PluginClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClass")
            .field("id", &self.id)
            .field("name", &self.metadata.name)
            .field("version", &self.metadata.version)
            .field("capability", &self.capability)
            .field("schema_fields", &self.schema.len())
            .finish()
    }
}

/// Start-time table of every plugin class this build knows how to make.
///
/// Descriptor files on disk select entries from here; nothing is loaded
/// from outside the binary.
#[derive(Debug, Clone, Default)]
pub struct PluginCatalog {
    classes: BTreeMap<String, PluginClass>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, class: PluginClass) -> Self {
        self.add(class);
        self
    }

    /// Returns false (and keeps the existing entry) on a duplicate id.
    pub fn add(&mut self, class: PluginClass) -> bool {
        if self.classes.contains_key(class.id()) {
            return false;
        }
        self.classes.insert(class.id().to_string(), class);
        true
    }

    pub fn get(&self, id: &str) -> Option<&PluginClass> {
        self.classes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginClass> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn capability_as_str_roundtrip() {
        for cap in [Capability::WeatherProvider, Capability::Feature] {
            assert_eq!(Capability::try_from(cap.as_str()).unwrap(), cap);
        }
        assert_eq!(Capability::try_from("Weather-Provider").unwrap(), Capability::WeatherProvider);
        assert!(Capability::try_from("widget").unwrap_err().to_string().contains("Unknown capability"));
    }

    #[test]
    fn metadata_defaults() {
        let meta = PluginMetadata::new("alpha");
        assert_eq!(meta.author, "Unknown");
        assert_eq!(meta.version, "0.1.0");
    }

    #[test]
    fn class_instantiates_role_object() {
        let class = test_support::provider_class("alpha");
        assert_eq!(class.name(), "alpha");
        assert_eq!(class.capability(), Capability::WeatherProvider);

        let instance = class.instantiate(&PluginConfig::new()).unwrap();
        assert!(instance.as_provider().is_some());
        assert!(instance.as_feature().is_none());
    }

    #[test]
    fn factory_error_is_construction_failure() {
        let class = test_support::failing_provider_class("beta");
        let err = class.instantiate(&PluginConfig::new()).unwrap_err();
        assert!(err.to_string().contains("beta"));
    }

    #[test]
    fn initialize_error_is_construction_failure() {
        let class = test_support::feature_class_failing_init("broken");
        assert!(class.instantiate(&PluginConfig::new()).is_err());
    }

    #[test]
    fn catalog_rejects_duplicate_ids() {
        let mut catalog = PluginCatalog::new().with(test_support::provider_class("alpha"));
        assert!(!catalog.add(test_support::failing_provider_class("alpha")));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("alpha").unwrap().instantiate(&PluginConfig::new()).is_ok());
    }

    #[test]
    fn same_as_compares_identity() {
        let class = test_support::provider_class("alpha");
        let a = class.instantiate(&PluginConfig::new()).unwrap();
        let b = class.instantiate(&PluginConfig::new()).unwrap();
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }
}

//! Plugin runtime for the `weather` CLI.
//!
//! This crate defines:
//! - Discovery of plugin descriptors and a registry of plugin classes
//! - Typed managers for weather providers and features
//! - A bridge that runs blocking providers on a bounded worker pool
//! - Per-plugin configuration with schema defaults, persisted as JSON
//! - The shared weather data model and the built-in plugins
//!
//! It is used by `weather-cli`, but can also be embedded in other hosts.

pub mod builtin;
pub mod config;
pub mod error;
pub mod feature;
pub mod host;
pub mod legacy;
pub mod loader;
pub mod manager;
pub mod model;
pub mod plugin;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod store;

#[cfg(test)]
mod test_support;

pub use builtin::builtin_catalog;
pub use config::HostConfig;
pub use error::{
    BridgeError, DispatchError, InitError, InstantiateError, LoadError, ManagerError,
    ProviderInitError, RegistrationError, SchemaError, StoreError,
};
pub use host::PluginHost;
pub use legacy::{
    BridgeState, LegacyBridge, LegacyDefinition, LegacyProvider, WorkerPool, legacy_plugin_class,
    register_legacy_providers,
};
pub use loader::PluginLoader;
pub use manager::{FeatureManager, WeatherProviderManager};
pub use model::{Alert, WeatherCondition, WeatherDataPoint, WeatherForecast};
pub use plugin::{
    Capability, Feature, FeatureAction, Plugin, PluginCatalog, PluginClass, PluginInstance,
    PluginMetadata, WeatherProvider,
};
pub use provider::ProviderId;
pub use registry::{LoadReport, PluginRegistry};
pub use schema::{ConfigFieldSpec, ConfigSchema, FieldKind};
pub use store::{ConfigDocument, ConfigStore, PluginConfig};

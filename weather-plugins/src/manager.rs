//! Capability-specific views over the [`PluginRegistry`](crate::PluginRegistry).

mod features;
mod providers;

pub use features::FeatureManager;
pub use providers::WeatherProviderManager;

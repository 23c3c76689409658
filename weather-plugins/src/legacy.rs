//! Adapter for providers that only offer blocking fetch methods.
//!
//! A [`LegacyBridge`] owns one legacy object and exposes it as an ordinary
//! async [`WeatherProvider`]. Blocking calls run on a shared [`WorkerPool`].

mod pool;

pub use pool::WorkerPool;

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{
    error::{BridgeError, InitError, RegistrationError},
    model::WeatherForecast,
    plugin::{Plugin, PluginClass, PluginMetadata, WeatherProvider},
    registry::PluginRegistry,
    schema::ConfigSchema,
    store::PluginConfig,
};

/// Future returned by a legacy provider's native async variant.
pub type LegacyFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<WeatherForecast>> + Send + 'a>>;

/// An older provider written against blocking I/O.
pub trait LegacyProvider: Send + Sync + fmt::Debug {
    fn get_current_weather(&self, location: &str) -> anyhow::Result<WeatherForecast>;

    /// Whether [`get_forecast`](Self::get_forecast) is implemented.
    fn supports_forecast(&self) -> bool {
        false
    }

    fn get_forecast(&self, location: &str, days: u32) -> anyhow::Result<WeatherForecast> {
        let _ = (location, days);
        anyhow::bail!("this provider has no forecast method")
    }

    /// Native async variant; `None` means the provider has none.
    fn current_weather_async<'a>(&'a self, location: &'a str) -> Option<LegacyFuture<'a>> {
        let _ = location;
        None
    }

    fn forecast_async<'a>(&'a self, location: &'a str, days: u32) -> Option<LegacyFuture<'a>> {
        let _ = (location, days);
        None
    }

    fn cleanup(&self) {}
}

/// Builds a legacy object from its stored settings.
pub type LegacyFactory =
    Arc<dyn Fn(&PluginConfig) -> anyhow::Result<Arc<dyn LegacyProvider>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Unconstructed,
    Initializing,
    Ready,
    /// Ready, with at least one call in flight.
    Busy,
    CleanedUp,
}

enum Slot {
    Unconstructed(PluginConfig),
    Initializing,
    Ready(Arc<dyn LegacyProvider>),
    CleanedUp,
}

pub struct LegacyBridge {
    name: String,
    factory: LegacyFactory,
    pool: WorkerPool,
    slot: RwLock<Slot>,
    in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LegacyBridge {
    /// The legacy object is built later, by [`Plugin::initialize`].
    pub fn new(
        name: impl Into<String>,
        factory: LegacyFactory,
        pool: WorkerPool,
        config: PluginConfig,
    ) -> Self {
        Self {
            name: name.into(),
            factory,
            pool,
            slot: RwLock::new(Slot::Unconstructed(config)),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BridgeState {
        match &*self.slot.read() {
            Slot::Unconstructed(_) => BridgeState::Unconstructed,
            Slot::Initializing => BridgeState::Initializing,
            Slot::Ready(_) if self.in_flight.load(Ordering::SeqCst) > 0 => BridgeState::Busy,
            Slot::Ready(_) => BridgeState::Ready,
            Slot::CleanedUp => BridgeState::CleanedUp,
        }
    }

    fn provider(&self) -> Result<Arc<dyn LegacyProvider>, BridgeError> {
        match &*self.slot.read() {
            Slot::Ready(provider) => Ok(Arc::clone(provider)),
            Slot::CleanedUp => Err(BridgeError::Closed(self.name.clone())),
            Slot::Unconstructed(_) | Slot::Initializing => {
                Err(BridgeError::NotInitialized(self.name.clone()))
            }
        }
    }

    fn busy(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    async fn blocking_current(
        &self,
        provider: &Arc<dyn LegacyProvider>,
        location: &str,
    ) -> anyhow::Result<WeatherForecast> {
        if let Some(call) = provider.current_weather_async(location) {
            return call.await;
        }

        let worker = Arc::clone(provider);
        let location = location.to_string();
        self.pool.run(&self.name, move || worker.get_current_weather(&location)).await?
    }
}

impl fmt::Debug for LegacyBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyBridge")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pool", &self.pool)
            .finish()
    }
}

impl Plugin for LegacyBridge {
    fn initialize(&self) -> Result<(), InitError> {
        let config = {
            let mut slot = self.slot.write();
            match std::mem::replace(&mut *slot, Slot::Initializing) {
                Slot::Unconstructed(config) => config,
                Slot::CleanedUp => {
                    *slot = Slot::CleanedUp;
                    return Err(InitError::Other(BridgeError::Closed(self.name.clone()).into()));
                }
                other => {
                    *slot = other;
                    return Ok(());
                }
            }
        };

        match (self.factory)(&config) {
            Ok(provider) => {
                *self.slot.write() = Slot::Ready(provider);
                info!(provider = %self.name, "legacy provider ready");
                Ok(())
            }
            Err(err) => {
                *self.slot.write() = Slot::Unconstructed(config);
                Err(InitError::Other(
                    err.context(format!("legacy provider '{}' could not be constructed", self.name)),
                ))
            }
        }
    }

    fn cleanup(&self) {
        let previous = std::mem::replace(&mut *self.slot.write(), Slot::CleanedUp);
        if let Slot::Ready(provider) = previous {
            provider.cleanup();
            debug!(provider = %self.name, "legacy provider cleaned up");
        }
    }

    /// Rebuilds the legacy object with the new settings; the old one is
    /// cleaned up only once the new one exists. A bridge cleaned up while
    /// the rebuild ran stays cleaned up.
    fn on_config_changed(&self, config: &PluginConfig) -> anyhow::Result<()> {
        if matches!(&*self.slot.read(), Slot::CleanedUp) {
            return Err(BridgeError::Closed(self.name.clone()).into());
        }

        let fresh = (self.factory)(config)?;
        let previous = {
            let mut slot = self.slot.write();
            match std::mem::replace(&mut *slot, Slot::CleanedUp) {
                Slot::CleanedUp => None,
                other => {
                    *slot = Slot::Ready(Arc::clone(&fresh));
                    Some(other)
                }
            }
        };

        match previous {
            Some(Slot::Ready(old)) => old.cleanup(),
            Some(_) => {}
            None => {
                fresh.cleanup();
                debug!(provider = %self.name, "bridge closed during reconfiguration, discarding rebuilt provider");
                return Err(BridgeError::Closed(self.name.clone()).into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WeatherProvider for LegacyBridge {
    async fn get_current_weather(&self, location: &str) -> anyhow::Result<WeatherForecast> {
        let provider = self.provider()?;
        let _busy = self.busy();
        self.blocking_current(&provider, location).await
    }

    async fn get_forecast(&self, location: &str, days: u32) -> anyhow::Result<WeatherForecast> {
        let provider = self.provider()?;
        let _busy = self.busy();

        if let Some(call) = provider.forecast_async(location, days) {
            return call.await;
        }

        if provider.supports_forecast() {
            let worker = Arc::clone(&provider);
            let location = location.to_string();
            return self.pool.run(&self.name, move || worker.get_forecast(&location, days)).await?;
        }

        warn!(provider = %self.name, "legacy provider has no forecast method, returning current weather only");
        let current = self.blocking_current(&provider, location).await?;
        Ok(current.current_only())
    }
}

/// Wraps a legacy factory into a registrable provider class.
pub fn legacy_plugin_class<F>(
    id: impl Into<String>,
    metadata: PluginMetadata,
    schema: ConfigSchema,
    pool: WorkerPool,
    factory: F,
) -> PluginClass
where
    F: Fn(&PluginConfig) -> anyhow::Result<Arc<dyn LegacyProvider>> + Send + Sync + 'static,
{
    let factory: LegacyFactory = Arc::new(factory);
    let name = metadata.name.clone();

    PluginClass::provider(id, metadata, schema, move |config| {
        Ok(LegacyBridge::new(name.clone(), Arc::clone(&factory), pool.clone(), config.clone()))
    })
}

/// Everything needed to register one legacy provider.
#[derive(Clone)]
pub struct LegacyDefinition {
    pub id: String,
    pub metadata: PluginMetadata,
    pub schema: ConfigSchema,
    pub factory: LegacyFactory,
}

impl LegacyDefinition {
    pub fn new<F>(id: impl Into<String>, metadata: PluginMetadata, schema: ConfigSchema, factory: F) -> Self
    where
        F: Fn(&PluginConfig) -> anyhow::Result<Arc<dyn LegacyProvider>> + Send + Sync + 'static,
    {
        Self { id: id.into(), metadata, schema, factory: Arc::new(factory) }
    }

    pub fn into_class(self, pool: &WorkerPool) -> PluginClass {
        let factory = self.factory;
        legacy_plugin_class(self.id, self.metadata, self.schema, pool.clone(), move |config| {
            factory(config)
        })
    }
}

impl fmt::Debug for LegacyDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyDefinition")
            .field("id", &self.id)
            .field("name", &self.metadata.name)
            .finish()
    }
}

/// Registers each definition behind a bridge; returns the names that are now
/// registered (with or without a live instance).
pub fn register_legacy_providers(
    registry: &PluginRegistry,
    pool: &WorkerPool,
    definitions: impl IntoIterator<Item = LegacyDefinition>,
) -> Vec<String> {
    definitions
        .into_iter()
        .filter_map(|definition| {
            let name = definition.metadata.name.clone();
            match registry.register(definition.into_class(pool)) {
                Ok(()) | Err(RegistrationError::ConstructionFailed { .. }) => Some(name),
                Err(RegistrationError::DuplicateName(_)) => None,
            }
        })
        .collect()
}

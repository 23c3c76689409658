//! Fixture plugins and helpers shared by the unit tests.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use crate::{
    error::InitError,
    model::{WeatherCondition, WeatherDataPoint, WeatherForecast},
    plugin::{Feature, FeatureAction, Plugin, PluginClass, PluginMetadata, WeatherProvider},
    schema::{ConfigFieldSpec, ConfigSchema},
    store::PluginConfig,
};

/// Counts what the runtime did to the instances of one fixture class.
#[derive(Debug, Default)]
pub struct Probe {
    pub constructed: AtomicUsize,
    pub cleanups: AtomicUsize,
    pub fetches: AtomicUsize,
    pub forecasts_seen: AtomicUsize,
    pub activations: AtomicUsize,
    /// Hook calls that reached an instance after its own cleanup.
    pub stale_calls: AtomicUsize,
    pub config_changes: Mutex<Vec<PluginConfig>>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn forecasts_seen(&self) -> usize {
        self.forecasts_seen.load(Ordering::SeqCst)
    }

    pub fn stale_calls(&self) -> usize {
        self.stale_calls.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<PluginConfig> {
        self.config_changes.lock().last().cloned()
    }
}

pub fn sample_point(hour: u32) -> WeatherDataPoint {
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap();
    WeatherDataPoint::new(ts, 18.5, WeatherCondition::Clear, "clear sky")
        .with_humidity(55)
        .with_pressure(1013)
}

pub fn sample_forecast(location: &str) -> WeatherForecast {
    let mut forecast = WeatherForecast::new(location, 45.0, 9.0, "UTC", sample_point(12));
    forecast.hourly = vec![sample_point(13), sample_point(14)];
    forecast.daily = vec![sample_point(12)];
    forecast
}

#[derive(Debug)]
pub struct StaticProvider {
    name: String,
    probe: Arc<Probe>,
}

impl Plugin for StaticProvider {
    fn cleanup(&self) {
        self.probe.cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn on_config_changed(&self, config: &PluginConfig) -> anyhow::Result<()> {
        if config.get("reject").and_then(|v| v.as_bool()).unwrap_or(false) {
            anyhow::bail!("{} rejects this configuration", self.name);
        }
        self.probe.config_changes.lock().push(config.clone());
        Ok(())
    }
}

#[async_trait]
impl WeatherProvider for StaticProvider {
    async fn get_current_weather(&self, location: &str) -> anyhow::Result<WeatherForecast> {
        self.probe.fetches.fetch_add(1, Ordering::SeqCst);
        if location.is_empty() {
            anyhow::bail!("{}: location must not be empty", self.name);
        }
        Ok(sample_forecast(location).current_only())
    }

    async fn get_forecast(&self, location: &str, days: u32) -> anyhow::Result<WeatherForecast> {
        self.probe.fetches.fetch_add(1, Ordering::SeqCst);
        let mut forecast = sample_forecast(location);
        forecast.daily.truncate(days as usize);
        Ok(forecast)
    }
}

fn units_schema() -> ConfigSchema {
    ConfigSchema::new().field(
        "units",
        ConfigFieldSpec::choice("Units", ["metric", "imperial"]).default_value("metric"),
    )
}

pub fn provider_class(name: &str) -> PluginClass {
    probed_provider_class(name, Probe::new())
}

pub fn probed_provider_class(name: &str, probe: Arc<Probe>) -> PluginClass {
    let owned = name.to_string();
    PluginClass::provider(
        name,
        PluginMetadata::new(name).author("tests").version("1.0.0"),
        units_schema(),
        move |_config| {
            probe.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(StaticProvider { name: owned.clone(), probe: Arc::clone(&probe) })
        },
    )
}

/// Provider whose construction always fails, like one missing its API key.
pub fn failing_provider_class(name: &str) -> PluginClass {
    let owned = name.to_string();
    PluginClass::provider(
        name,
        PluginMetadata::new(name),
        ConfigSchema::new().field("api_key", ConfigFieldSpec::string("API Key").required().secret()),
        move |config| -> Result<StaticProvider, InitError> {
            match config.get("api_key").and_then(|v| v.as_str()) {
                Some(key) if !key.is_empty() => Ok(StaticProvider { name: owned.clone(), probe: Probe::new() }),
                _ => Err(InitError::MissingSetting { plugin: owned.clone(), key: "api_key".into() }),
            }
        },
    )
}

#[derive(Debug)]
pub struct StaticFeature {
    probe: Arc<Probe>,
    fail_init: bool,
    category: String,
    toolbar: bool,
    actions: Vec<FeatureAction>,
    cleaned: AtomicBool,
}

impl StaticFeature {
    fn touch(&self) {
        if self.cleaned.load(Ordering::SeqCst) {
            self.probe.stale_calls.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Plugin for StaticFeature {
    fn initialize(&self) -> Result<(), InitError> {
        if self.fail_init {
            return Err(InitError::Other(anyhow::anyhow!("feature refused to start")));
        }
        Ok(())
    }

    fn cleanup(&self) {
        self.cleaned.store(true, Ordering::SeqCst);
        self.probe.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

impl Feature for StaticFeature {
    fn category(&self) -> &str {
        &self.category
    }

    fn add_to_toolbar(&self) -> bool {
        self.toolbar
    }

    fn menu_actions(&self) -> Vec<FeatureAction> {
        self.touch();
        self.actions.clone()
    }

    fn on_activate(&self) -> anyhow::Result<()> {
        self.touch();
        self.probe.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_forecast(&self, _forecast: &WeatherForecast) {
        self.touch();
        self.probe.forecasts_seen.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn feature_class(name: &str, category: &str, toolbar: bool, probe: Arc<Probe>) -> PluginClass {
    feature_class_with_actions(name, category, toolbar, probe, Vec::new())
}

pub fn feature_class_with_actions(
    name: &str,
    category: &str,
    toolbar: bool,
    probe: Arc<Probe>,
    actions: Vec<FeatureAction>,
) -> PluginClass {
    let category = category.to_string();
    PluginClass::feature(name, PluginMetadata::new(name), ConfigSchema::new(), move |_config| {
        probe.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(StaticFeature {
            probe: Arc::clone(&probe),
            fail_init: false,
            category: category.clone(),
            toolbar,
            actions: actions.clone(),
            cleaned: AtomicBool::new(false),
        })
    })
}

pub fn feature_class_failing_init(name: &str) -> PluginClass {
    PluginClass::feature(name, PluginMetadata::new(name), ConfigSchema::new(), |_config| {
        Ok(StaticFeature {
            probe: Probe::new(),
            fail_init: true,
            category: "Broken".into(),
            toolbar: false,
            actions: Vec::new(),
            cleaned: AtomicBool::new(false),
        })
    })
}

pub fn action(id: &str) -> FeatureAction {
    FeatureAction::new(id, id)
}

/// Log lines captured from a scoped `tracing` subscriber.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().lines().filter(|line| line.contains(needle)).count()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Routes this thread's events into a buffer until the guard drops.
pub fn capture_logs() -> (tracing::subscriber::DefaultGuard, LogBuffer) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    (tracing::subscriber::set_default(subscriber), buffer)
}

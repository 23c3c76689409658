use std::{
    collections::{BTreeMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    error::InitError,
    model::{WeatherDataPoint, WeatherForecast},
    plugin::{Feature, FeatureAction, Plugin, PluginClass, PluginMetadata},
    schema::{ConfigFieldSpec, ConfigSchema},
    store::PluginConfig,
};

pub const NAME: &str = "history";
pub const DEFAULT_MAX_ENTRIES: usize = 100;
const MAX_ENTRIES_LIMIT: usize = 10_000;

pub fn plugin_class() -> PluginClass {
    PluginClass::feature(
        NAME,
        PluginMetadata::new(NAME)
            .author("weather-plugins")
            .version("1.0.0")
            .description("Remembers recent observations per location"),
        schema(),
        HistoryFeature::from_config,
    )
}

pub fn schema() -> ConfigSchema {
    ConfigSchema::new().field(
        "max_entries",
        ConfigFieldSpec::int("Entries per location")
            .description("How many observations to keep for each location")
            .default_value(DEFAULT_MAX_ENTRIES as u64)
            .range(1.0, MAX_ENTRIES_LIMIT as f64),
    )
}

/// One remembered observation.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub recorded_at: DateTime<Utc>,
    pub observation: WeatherDataPoint,
}

#[derive(Debug)]
pub struct HistoryFeature {
    max_entries: AtomicUsize,
    entries: RwLock<BTreeMap<String, VecDeque<HistoryEntry>>>,
}

impl HistoryFeature {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: AtomicUsize::new(max_entries.max(1)),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_config(config: &PluginConfig) -> Result<Self, InitError> {
        Ok(Self::new(max_entries(config)?))
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries.load(Ordering::SeqCst)
    }

    pub fn locations(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Oldest first.
    pub fn entries(&self, location: &str) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .get(location)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, location: &str) -> Option<HistoryEntry> {
        self.entries.read().get(location).and_then(|queue| queue.back().cloned())
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn record(&self, forecast: &WeatherForecast) {
        let limit = self.max_entries();
        let mut entries = self.entries.write();
        let queue = entries.entry(forecast.location.clone()).or_default();
        queue.push_back(HistoryEntry { recorded_at: Utc::now(), observation: forecast.current.clone() });
        while queue.len() > limit {
            queue.pop_front();
        }
    }

    fn set_limit(&self, limit: usize) {
        self.max_entries.store(limit, Ordering::SeqCst);
        for queue in self.entries.write().values_mut() {
            while queue.len() > limit {
                queue.pop_front();
            }
        }
    }
}

fn max_entries(config: &PluginConfig) -> Result<usize, InitError> {
    let Some(value) = config.get("max_entries") else {
        return Ok(DEFAULT_MAX_ENTRIES);
    };

    value
        .as_u64()
        .map(|n| n as usize)
        .filter(|n| (1..=MAX_ENTRIES_LIMIT).contains(n))
        .ok_or_else(|| InitError::InvalidSetting {
            plugin: NAME.to_string(),
            key: "max_entries".into(),
            reason: format!("expected a whole number between 1 and {MAX_ENTRIES_LIMIT}, got {value}"),
        })
}

impl Plugin for HistoryFeature {
    fn cleanup(&self) {
        self.clear();
    }

    fn on_config_changed(&self, config: &PluginConfig) -> anyhow::Result<()> {
        let limit = max_entries(config)?;
        self.set_limit(limit);
        debug!(feature = NAME, limit, "history limit updated");
        Ok(())
    }
}

impl Feature for HistoryFeature {
    fn category(&self) -> &str {
        "Data"
    }

    fn menu_actions(&self) -> Vec<FeatureAction> {
        vec![FeatureAction::new("history.show", "Weather History")]
    }

    fn on_forecast(&self, forecast: &WeatherForecast) {
        self.record(forecast);
    }
}

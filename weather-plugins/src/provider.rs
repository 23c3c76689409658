//! Built-in weather providers and the helpers they share.

use std::{env, fmt};

use chrono::{DateTime, Utc};

use crate::{
    error::InitError,
    legacy::WorkerPool,
    plugin::PluginClass,
    store::PluginConfig,
};

pub mod openmeteo;
pub mod openweather;
pub mod weatherapi;

/// Shortest API key any built-in provider accepts.
pub const MIN_API_KEY_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenMeteo,
    OpenWeather,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenMeteo => "openmeteo",
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenMeteo, ProviderId::OpenWeather, ProviderId::WeatherApi]
    }

    /// The plugin class for this provider. Blocking providers run on `pool`.
    pub fn plugin_class(&self, pool: &WorkerPool) -> PluginClass {
        match self {
            ProviderId::OpenMeteo => openmeteo::plugin_class(),
            ProviderId::OpenWeather => openweather::plugin_class(),
            ProviderId::WeatherApi => weatherapi::definition().into_class(pool),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openmeteo" | "open-meteo" => Ok(ProviderId::OpenMeteo),
            "openweather" | "openweathermap" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Built-in providers: openmeteo, openweather, weatherapi."
            )),
        }
    }
}

/// String setting, or `fallback` when absent or not a string.
pub(crate) fn setting<'a>(config: &'a PluginConfig, key: &str, fallback: &'a str) -> &'a str {
    config.get(key).and_then(|v| v.as_str()).unwrap_or(fallback)
}

/// API key from the plugin config, falling back to `env_var`.
pub(crate) fn api_key(plugin: &str, config: &PluginConfig, env_var: &str) -> Result<String, InitError> {
    let key = config
        .get("api_key")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|k| !k.trim().is_empty())
        .or_else(|| env::var(env_var).ok().filter(|k| !k.trim().is_empty()))
        .ok_or_else(|| InitError::MissingSetting { plugin: plugin.to_string(), key: "api_key".into() })?;

    let key = key.trim().to_string();
    if key.len() < MIN_API_KEY_LEN {
        return Err(InitError::InvalidSetting {
            plugin: plugin.to_string(),
            key: "api_key".into(),
            reason: format!("API keys are at least {MIN_API_KEY_LEN} characters long"),
        });
    }
    Ok(key)
}

/// `"lat,lon"` as a pair of coordinates; `None` for anything else.
pub fn parse_coordinates(location: &str) -> Option<(f64, f64)> {
    let (lat, lon) = location.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;

    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
}

pub(crate) fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

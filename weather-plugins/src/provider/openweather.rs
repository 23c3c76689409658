use std::{collections::BTreeMap, fmt};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, Timelike, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};

use crate::{
    error::InitError,
    model::{WeatherCondition, WeatherDataPoint, WeatherForecast},
    plugin::{Plugin, PluginClass, PluginMetadata, WeatherProvider},
    provider::{api_key, parse_coordinates, setting, truncate_body, unix_to_utc},
    schema::{ConfigFieldSpec, ConfigSchema},
    store::PluginConfig,
};

const NAME: &str = "openweather";
const API_KEY_ENV: &str = "OPENWEATHERMAP_API_KEY";
const CURRENT_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const FORECAST_URL: &str = "https://api.openweathermap.org/data/2.5/forecast";

/// The free forecast endpoint covers five days in 3-hour slots.
const MAX_DAYS: u32 = 5;
const SLOTS_PER_DAY: usize = 8;

pub fn plugin_class() -> PluginClass {
    PluginClass::provider(
        NAME,
        PluginMetadata::new(NAME)
            .author("weather-plugins")
            .version("1.1.0")
            .description("Current weather and 5-day forecast from OpenWeatherMap"),
        schema(),
        OpenWeatherProvider::new,
    )
}

pub fn schema() -> ConfigSchema {
    ConfigSchema::new()
        .field(
            "api_key",
            ConfigFieldSpec::string("API Key")
                .description("Your OpenWeatherMap API key")
                .required()
                .secret(),
        )
        .field(
            "units",
            ConfigFieldSpec::choice("Units", ["metric", "imperial", "standard"])
                .default_value("metric")
                .description("Temperature units (metric, imperial, or standard)"),
        )
        .field("language", ConfigFieldSpec::string("Language").default_value("en"))
}

#[derive(Clone)]
struct Settings {
    api_key: String,
    units: String,
    language: String,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("units", &self.units)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl Settings {
    fn from_config(config: &PluginConfig) -> Result<Self, InitError> {
        Ok(Self {
            api_key: api_key(NAME, config, API_KEY_ENV)?,
            units: setting(config, "units", "metric").to_string(),
            language: setting(config, "language", "en").to_string(),
        })
    }

    fn query(&self, location: &str) -> Vec<(&'static str, String)> {
        let mut query = match parse_coordinates(location) {
            Some((lat, lon)) => vec![("lat", lat.to_string()), ("lon", lon.to_string())],
            None => vec![("q", location.to_string())],
        };
        query.push(("appid", self.api_key.clone()));
        query.push(("units", self.units.clone()));
        query.push(("lang", self.language.clone()));
        query
    }
}

#[derive(Debug)]
pub struct OpenWeatherProvider {
    http: Client,
    settings: RwLock<Settings>,
}

impl OpenWeatherProvider {
    /// Fails without an API key of plausible length.
    pub fn new(config: &PluginConfig) -> Result<Self, InitError> {
        Ok(Self { http: Client::new(), settings: RwLock::new(Settings::from_config(config)?) })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, location: &str, what: &str) -> Result<T> {
        if location.trim().is_empty() {
            return Err(anyhow!("Location cannot be empty"));
        }
        let query = self.settings.read().query(location.trim());

        let res = self
            .http
            .get(url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("Failed to send request to OpenWeather ({what})"))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .with_context(|| format!("Failed to read OpenWeather {what} response body"))?;

        if !status.is_success() {
            return Err(anyhow!(
                "OpenWeather {what} request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        serde_json::from_str(&body).with_context(|| format!("Failed to parse OpenWeather {what} JSON"))
    }
}

impl Plugin for OpenWeatherProvider {
    fn on_config_changed(&self, config: &PluginConfig) -> Result<()> {
        *self.settings.write() = Settings::from_config(config)?;
        Ok(())
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn get_current_weather(&self, location: &str) -> Result<WeatherForecast> {
        let parsed: OwCurrentResponse = self.get_json(CURRENT_URL, location, "current weather").await?;
        Ok(current_to_forecast(location, parsed))
    }

    async fn get_forecast(&self, location: &str, days: u32) -> Result<WeatherForecast> {
        let parsed: OwForecastResponse = self.get_json(FORECAST_URL, location, "5-day forecast").await?;
        forecast_to_forecast(location, parsed, days)
    }
}

#[derive(Debug, Deserialize)]
struct OwCoord {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    humidity: u8,
    pressure: u32,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    main: String,
    description: String,
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
    #[serde(default)]
    deg: u16,
    gust: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OwClouds {
    all: u8,
}

#[derive(Debug, Default, Deserialize)]
struct OwRain {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
    #[serde(rename = "3h")]
    three_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwEntry {
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
    #[serde(default)]
    clouds: OwClouds,
    visibility: Option<u32>,
    rain: Option<OwRain>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: String,
    coord: OwCoord,
    #[serde(default)]
    timezone: i32,
    #[serde(flatten)]
    entry: OwEntry,
}

#[derive(Debug, Deserialize)]
struct OwCity {
    name: String,
    country: Option<String>,
    coord: OwCoord,
    #[serde(default)]
    timezone: i32,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    city: OwCity,
    list: Vec<OwEntry>,
}

fn timezone_label(offset_seconds: i32) -> String {
    match FixedOffset::east_opt(offset_seconds) {
        Some(offset) if offset_seconds != 0 => format!("UTC{offset}"),
        _ => "UTC".to_string(),
    }
}

fn to_point(entry: &OwEntry) -> WeatherDataPoint {
    let weather = entry.weather.first();
    let condition = weather
        .and_then(|w| WeatherCondition::try_from(w.main.as_str()).ok())
        .unwrap_or(WeatherCondition::Clear);
    let description = weather.map(|w| w.description.clone()).unwrap_or_else(|| "Unknown".to_string());

    let mut point = WeatherDataPoint::new(
        unix_to_utc(entry.dt).unwrap_or_else(Utc::now),
        entry.main.temp,
        condition,
        description,
    )
    .with_feels_like(entry.main.feels_like)
    .with_humidity(entry.main.humidity)
    .with_pressure(entry.main.pressure)
    .with_wind(entry.wind.speed, entry.wind.deg, entry.wind.gust)
    .with_cloudiness(entry.clouds.all);

    if let Some(icon) = weather.and_then(|w| w.icon.clone()) {
        point = point.with_icon(icon);
    }
    if let Some(meters) = entry.visibility {
        point = point.with_visibility(meters);
    }
    if let Some(mm) = entry.rain.as_ref().and_then(|r| r.one_hour.or(r.three_hours)) {
        point = point.with_precipitation(mm);
    }
    point
}

fn current_to_forecast(location: &str, resp: OwCurrentResponse) -> WeatherForecast {
    let name = if resp.name.is_empty() { location.to_string() } else { resp.name.clone() };
    WeatherForecast::new(
        name,
        resp.coord.lat,
        resp.coord.lon,
        timezone_label(resp.timezone),
        to_point(&resp.entry),
    )
}

/// The first slot stands in for "current"; one slot per day, the one
/// closest to midday, becomes the daily series.
fn forecast_to_forecast(location: &str, resp: OwForecastResponse, days: u32) -> Result<WeatherForecast> {
    let first = resp
        .list
        .first()
        .ok_or_else(|| anyhow!("OpenWeather forecast response contained no data"))?;

    let days = days.clamp(1, MAX_DAYS);
    let name = match &resp.city.country {
        Some(country) if !resp.city.name.is_empty() => format!("{}, {}", resp.city.name, country),
        _ if !resp.city.name.is_empty() => resp.city.name.clone(),
        _ => location.to_string(),
    };

    let mut forecast = WeatherForecast::new(
        name,
        resp.city.coord.lat,
        resp.city.coord.lon,
        timezone_label(resp.city.timezone),
        to_point(first),
    );

    forecast.hourly = resp
        .list
        .iter()
        .take(days as usize * SLOTS_PER_DAY)
        .map(to_point)
        .collect();

    let mut by_day: BTreeMap<NaiveDate, WeatherDataPoint> = BTreeMap::new();
    for point in &forecast.hourly {
        let distance = |p: &WeatherDataPoint| (p.timestamp.hour() as i32 - 12).abs();
        by_day
            .entry(point.timestamp.date_naive())
            .and_modify(|best| {
                if distance(point) < distance(best) {
                    *best = point.clone();
                }
            })
            .or_insert_with(|| point.clone());
    }
    forecast.daily = by_day.into_values().take(days as usize).collect();

    Ok(forecast)
}

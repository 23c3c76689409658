use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{
    model::{WeatherCondition, WeatherDataPoint, WeatherForecast},
    plugin::{Plugin, PluginClass, PluginMetadata, WeatherProvider},
    provider::{parse_coordinates, setting, truncate_body},
    schema::{ConfigFieldSpec, ConfigSchema},
    store::PluginConfig,
};

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";

const MAX_HOURS: usize = 48;
const MAX_DAYS: u32 = 16;

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,weather_code,\
    surface_pressure,wind_speed_10m,wind_direction_10m,wind_gusts_10m,precipitation,cloud_cover,is_day";
const HOURLY_FIELDS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,weather_code,\
    surface_pressure,wind_speed_10m,wind_direction_10m,precipitation,visibility,is_day";
const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,apparent_temperature_max,precipitation_sum,\
    wind_speed_10m_max,wind_gusts_10m_max,wind_direction_10m_dominant,uv_index_max";

pub fn plugin_class() -> PluginClass {
    PluginClass::provider(
        "openmeteo",
        PluginMetadata::new("openmeteo")
            .author("weather-plugins")
            .version("2.0.0")
            .description("Provides weather data using the Open-Meteo API"),
        schema(),
        |config| Ok(OpenMeteoProvider::new(config)),
    )
}

pub fn schema() -> ConfigSchema {
    ConfigSchema::new()
        .field(
            "units",
            ConfigFieldSpec::choice("Units", ["metric", "imperial"])
                .default_value("metric")
                .description("Units for temperature and wind speed"),
        )
        .field(
            "language",
            ConfigFieldSpec::string("Language")
                .default_value("en")
                .description("Language for place names"),
        )
        .field(
            "timezone",
            ConfigFieldSpec::string("Timezone")
                .default_value("auto")
                .description("Timezone for timestamps (e.g. 'Europe/Rome' or 'auto')"),
        )
}

#[derive(Debug, Clone, PartialEq)]
struct Settings {
    imperial: bool,
    language: String,
    timezone: String,
}

impl Settings {
    fn from_config(config: &PluginConfig) -> Self {
        Self {
            imperial: setting(config, "units", "metric") == "imperial",
            language: setting(config, "language", "en").to_string(),
            timezone: setting(config, "timezone", "auto").to_string(),
        }
    }
}

/// Free provider; no API key needed.
#[derive(Debug)]
pub struct OpenMeteoProvider {
    http: Client,
    settings: RwLock<Settings>,
    locations: Mutex<HashMap<String, (f64, f64)>>,
}

impl OpenMeteoProvider {
    pub fn new(config: &PluginConfig) -> Self {
        Self {
            http: Client::new(),
            settings: RwLock::new(Settings::from_config(config)),
            locations: Mutex::new(HashMap::new()),
        }
    }

    async fn geocode(&self, location: &str) -> Result<(f64, f64)> {
        let location = location.trim();
        if location.is_empty() {
            return Err(anyhow!("Location cannot be empty"));
        }
        if let Some(coords) = parse_coordinates(location) {
            return Ok(coords);
        }
        let cached = self.locations.lock().get(location).copied();
        if let Some(coords) = cached {
            return Ok(coords);
        }

        let language = self.settings.read().language.clone();
        let res = self
            .http
            .get(GEOCODING_URL)
            .query(&[("name", location), ("count", "1"), ("language", language.as_str()), ("format", "json")])
            .send()
            .await
            .context("Failed to send request to Open-Meteo (geocoding)")?;

        let status = res.status();
        let body = res.text().await.context("Failed to read Open-Meteo geocoding response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "Open-Meteo geocoding request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        let parsed: GeoResponse =
            serde_json::from_str(&body).context("Failed to parse Open-Meteo geocoding JSON")?;
        let place = parsed
            .results
            .first()
            .ok_or_else(|| anyhow!("Location '{location}' not found"))?;

        debug!(location, name = %place.name, "geocoded location");
        let coords = (place.latitude, place.longitude);
        self.locations.lock().insert(location.to_string(), coords);
        Ok(coords)
    }

    async fn fetch(&self, location: &str, days: u32) -> Result<WeatherForecast> {
        let (lat, lon) = self.geocode(location).await?;
        let settings = self.settings.read().clone();

        let (temperature_unit, wind_speed_unit) =
            if settings.imperial { ("fahrenheit", "mph") } else { ("celsius", "kmh") };

        let res = self
            .http
            .get(FORECAST_URL)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("hourly", HOURLY_FIELDS.to_string()),
                ("daily", DAILY_FIELDS.to_string()),
                ("temperature_unit", temperature_unit.to_string()),
                ("wind_speed_unit", wind_speed_unit.to_string()),
                ("precipitation_unit", "mm".to_string()),
                ("timezone", settings.timezone.clone()),
                ("forecast_days", days.clamp(1, MAX_DAYS).to_string()),
            ])
            .send()
            .await
            .context("Failed to send request to Open-Meteo (forecast)")?;

        let status = res.status();
        let body = res.text().await.context("Failed to read Open-Meteo forecast response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "Open-Meteo forecast request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        let parsed: OmResponse =
            serde_json::from_str(&body).context("Failed to parse Open-Meteo forecast JSON")?;

        to_forecast(location, parsed, days)
    }
}

impl Plugin for OpenMeteoProvider {
    fn cleanup(&self) {
        self.locations.lock().clear();
    }

    fn on_config_changed(&self, config: &PluginConfig) -> Result<()> {
        *self.settings.write() = Settings::from_config(config);
        Ok(())
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    async fn get_current_weather(&self, location: &str) -> Result<WeatherForecast> {
        Ok(self.fetch(location, 1).await?.current_only())
    }

    async fn get_forecast(&self, location: &str, days: u32) -> Result<WeatherForecast> {
        self.fetch(location, days).await
    }
}

/// WMO weather interpretation code.
pub fn condition_for_code(code: u16) -> WeatherCondition {
    match code {
        0 | 1 => WeatherCondition::Clear,
        2 | 3 => WeatherCondition::Clouds,
        45 | 48 => WeatherCondition::Fog,
        51..=57 => WeatherCondition::Drizzle,
        61..=67 | 80..=82 => WeatherCondition::Rain,
        71..=77 | 85 | 86 => WeatherCondition::Snow,
        95..=99 => WeatherCondition::Thunderstorm,
        _ => WeatherCondition::Clear,
    }
}

pub fn description_for_code(code: u16) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Foggy",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Dense freezing drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Unknown weather conditions",
    }
}

fn icon_for_code(code: u16, is_day: bool) -> &'static str {
    let day_night = |d, n| if is_day { d } else { n };
    match condition_for_code(code) {
        WeatherCondition::Clear => day_night("01d", "01n"),
        WeatherCondition::Clouds => day_night("02d", "02n"),
        WeatherCondition::Fog | WeatherCondition::Drizzle => "50d",
        WeatherCondition::Rain => day_night("10d", "10n"),
        WeatherCondition::Snow => "13d",
        WeatherCondition::Thunderstorm => "11d",
        _ => "01d",
    }
}

#[derive(Debug, Deserialize)]
struct GeoPlace {
    name: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct GeoResponse {
    #[serde(default)]
    results: Vec<GeoPlace>,
}

#[derive(Debug, Deserialize)]
struct OmCurrent {
    time: String,
    temperature_2m: f64,
    relative_humidity_2m: Option<f64>,
    apparent_temperature: Option<f64>,
    weather_code: Option<u16>,
    surface_pressure: Option<f64>,
    wind_speed_10m: Option<f64>,
    wind_direction_10m: Option<f64>,
    wind_gusts_10m: Option<f64>,
    precipitation: Option<f64>,
    cloud_cover: Option<f64>,
    is_day: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OmHourly {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    relative_humidity_2m: Vec<Option<f64>>,
    apparent_temperature: Vec<Option<f64>>,
    weather_code: Vec<Option<u16>>,
    surface_pressure: Vec<Option<f64>>,
    wind_speed_10m: Vec<Option<f64>>,
    wind_direction_10m: Vec<Option<f64>>,
    precipitation: Vec<Option<f64>>,
    visibility: Vec<Option<f64>>,
    is_day: Vec<Option<u8>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OmDaily {
    time: Vec<String>,
    weather_code: Vec<Option<u16>>,
    temperature_2m_max: Vec<Option<f64>>,
    apparent_temperature_max: Vec<Option<f64>>,
    precipitation_sum: Vec<Option<f64>>,
    wind_speed_10m_max: Vec<Option<f64>>,
    wind_gusts_10m_max: Vec<Option<f64>>,
    wind_direction_10m_dominant: Vec<Option<f64>>,
    uv_index_max: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct OmResponse {
    latitude: f64,
    longitude: f64,
    timezone: Option<String>,
    #[serde(default)]
    utc_offset_seconds: i64,
    current: OmCurrent,
    #[serde(default)]
    hourly: OmHourly,
    #[serde(default)]
    daily: OmDaily,
}

fn at<T: Copy>(values: &[Option<T>], i: usize) -> Option<T> {
    values.get(i).copied().flatten()
}

/// Open-Meteo reports local wall-clock times without an offset.
fn local_to_utc(time: &str, offset_seconds: i64) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M")
        .or_else(|_| {
            NaiveDate::parse_from_str(time, "%Y-%m-%d").map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .with_context(|| format!("Unrecognized Open-Meteo timestamp '{time}'"))?;

    Ok((naive - Duration::seconds(offset_seconds)).and_utc())
}

fn clamp_u8(v: f64) -> u8 {
    v.round().clamp(0.0, u8::MAX as f64) as u8
}

fn to_forecast(location: &str, resp: OmResponse, days: u32) -> Result<WeatherForecast> {
    let offset = resp.utc_offset_seconds;
    let cur = &resp.current;
    let code = cur.weather_code.unwrap_or(0);

    let mut current = WeatherDataPoint::new(
        local_to_utc(&cur.time, offset)?,
        cur.temperature_2m,
        condition_for_code(code),
        description_for_code(code),
    )
    .with_feels_like(cur.apparent_temperature.unwrap_or(cur.temperature_2m))
    .with_humidity(clamp_u8(cur.relative_humidity_2m.unwrap_or(0.0)))
    .with_pressure(cur.surface_pressure.unwrap_or(1013.0).round() as u32)
    .with_wind(
        cur.wind_speed_10m.unwrap_or(0.0),
        cur.wind_direction_10m.unwrap_or(0.0).round() as u16 % 360,
        cur.wind_gusts_10m,
    )
    .with_icon(icon_for_code(code, cur.is_day.unwrap_or(1) == 1));
    if let Some(mm) = cur.precipitation {
        current = current.with_precipitation(mm);
    }
    if let Some(pct) = cur.cloud_cover {
        current = current.with_cloudiness(clamp_u8(pct));
    }

    let mut forecast = WeatherForecast::new(
        location,
        resp.latitude,
        resp.longitude,
        resp.timezone.clone().unwrap_or_else(|| "UTC".to_string()),
        current,
    );

    let h = &resp.hourly;
    for (i, time) in h.time.iter().enumerate().take(MAX_HOURS) {
        let Some(temperature) = at(&h.temperature_2m, i) else {
            continue;
        };
        let code = at(&h.weather_code, i).unwrap_or(0);

        let mut point = WeatherDataPoint::new(
            local_to_utc(time, offset)?,
            temperature,
            condition_for_code(code),
            description_for_code(code),
        )
        .with_feels_like(at(&h.apparent_temperature, i).unwrap_or(temperature))
        .with_humidity(clamp_u8(at(&h.relative_humidity_2m, i).unwrap_or(0.0)))
        .with_pressure(at(&h.surface_pressure, i).unwrap_or(1013.0).round() as u32)
        .with_wind(
            at(&h.wind_speed_10m, i).unwrap_or(0.0),
            at(&h.wind_direction_10m, i).unwrap_or(0.0).round() as u16 % 360,
            None,
        )
        .with_icon(icon_for_code(code, at(&h.is_day, i).unwrap_or(1) == 1));
        if let Some(mm) = at(&h.precipitation, i) {
            point = point.with_precipitation(mm);
        }
        if let Some(m) = at(&h.visibility, i) {
            point = point.with_visibility(m.max(0.0).round() as u32);
        }
        forecast.hourly.push(point);
    }

    let d = &resp.daily;
    for (i, day) in d.time.iter().enumerate().take(days as usize) {
        let Some(temperature) = at(&d.temperature_2m_max, i) else {
            continue;
        };
        let code = at(&d.weather_code, i).unwrap_or(0);

        let mut point = WeatherDataPoint::new(
            local_to_utc(day, offset)?,
            temperature,
            condition_for_code(code),
            description_for_code(code),
        )
        .with_feels_like(at(&d.apparent_temperature_max, i).unwrap_or(temperature))
        .with_wind(
            at(&d.wind_speed_10m_max, i).unwrap_or(0.0),
            at(&d.wind_direction_10m_dominant, i).unwrap_or(0.0).round() as u16 % 360,
            at(&d.wind_gusts_10m_max, i),
        )
        .with_icon(icon_for_code(code, true));
        if let Some(mm) = at(&d.precipitation_sum, i) {
            point = point.with_precipitation(mm);
        }
        if let Some(uv) = at(&d.uv_index_max, i) {
            point = point.with_uv_index(uv);
        }
        forecast.daily.push(point);
    }

    Ok(forecast)
}

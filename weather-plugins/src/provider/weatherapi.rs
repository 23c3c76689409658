//! WeatherAPI.com, written against a blocking HTTP client and exposed
//! through the legacy bridge.

use std::{fmt, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, de::DeserializeOwned};

use crate::{
    legacy::{LegacyDefinition, LegacyProvider},
    model::{WeatherCondition, WeatherDataPoint, WeatherForecast},
    plugin::PluginMetadata,
    provider::{api_key, truncate_body, unix_to_utc},
    schema::{ConfigFieldSpec, ConfigSchema},
    store::PluginConfig,
};

const NAME: &str = "weatherapi";
const API_KEY_ENV: &str = "WEATHERAPI_API_KEY";
const CURRENT_URL: &str = "https://api.weatherapi.com/v1/current.json";
const FORECAST_URL: &str = "https://api.weatherapi.com/v1/forecast.json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_DAYS: u32 = 14;

pub fn definition() -> LegacyDefinition {
    LegacyDefinition::new(
        NAME,
        PluginMetadata::new(NAME)
            .author("weather-plugins")
            .version("1.0.0")
            .description("WeatherAPI.com current conditions and forecast (blocking client)"),
        schema(),
        |config| {
            let provider: Arc<dyn LegacyProvider> = Arc::new(WeatherApiProvider::new(config)?);
            Ok(provider)
        },
    )
}

pub fn schema() -> ConfigSchema {
    ConfigSchema::new()
        .field(
            "api_key",
            ConfigFieldSpec::string("API Key")
                .description("Your WeatherAPI.com key")
                .required()
                .secret(),
        )
        .field(
            "air_quality",
            ConfigFieldSpec::bool("Air quality").default_value(false),
        )
}

#[derive(Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    air_quality: bool,
}

impl fmt::Debug for WeatherApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeatherApiProvider")
            .field("air_quality", &self.air_quality)
            .finish_non_exhaustive()
    }
}

impl WeatherApiProvider {
    pub fn new(config: &PluginConfig) -> Result<Self> {
        Ok(Self {
            api_key: api_key(NAME, config, API_KEY_ENV)?,
            air_quality: config.get("air_quality").and_then(|v| v.as_bool()).unwrap_or(false),
        })
    }

    /// A fresh blocking client per call; it is created and dropped on the
    /// worker thread running the call.
    fn get_json<T: DeserializeOwned>(&self, url: &str, extra: &[(&str, String)], what: &str) -> Result<T> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build WeatherAPI HTTP client")?;

        let aqi = if self.air_quality { "yes" } else { "no" };
        let res = http
            .get(url)
            .query(&[("key", self.api_key.as_str()), ("aqi", aqi)])
            .query(extra)
            .send()
            .with_context(|| format!("Failed to send request to WeatherAPI.com ({what})"))?;

        let status = res.status();
        let body = res
            .text()
            .with_context(|| format!("Failed to read WeatherAPI {what} response body"))?;

        if !status.is_success() {
            return Err(anyhow!(
                "WeatherAPI {what} request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        serde_json::from_str(&body).with_context(|| format!("Failed to parse WeatherAPI {what} JSON"))
    }
}

impl LegacyProvider for WeatherApiProvider {
    fn get_current_weather(&self, location: &str) -> Result<WeatherForecast> {
        let parsed: WaResponse = self.get_json(CURRENT_URL, &[("q", location.to_string())], "current")?;
        Ok(WeatherForecast::new(
            parsed.location.label(),
            parsed.location.lat,
            parsed.location.lon,
            parsed.location.tz_id.clone(),
            current_point(&parsed.current),
        ))
    }

    fn supports_forecast(&self) -> bool {
        true
    }

    fn get_forecast(&self, location: &str, days: u32) -> Result<WeatherForecast> {
        let days = days.clamp(1, MAX_DAYS);
        let parsed: WaForecastResponse = self.get_json(
            FORECAST_URL,
            &[("q", location.to_string()), ("days", days.to_string())],
            "forecast",
        )?;
        Ok(to_forecast(parsed))
    }
}

/// WeatherAPI condition codes, grouped.
pub fn condition_for_code(code: u16) -> WeatherCondition {
    match code {
        1000 => WeatherCondition::Clear,
        1003 | 1006 | 1009 => WeatherCondition::Clouds,
        1030 => WeatherCondition::Mist,
        1135 | 1147 => WeatherCondition::Fog,
        1072 | 1150..=1171 => WeatherCondition::Drizzle,
        1063 | 1180..=1201 | 1240..=1246 => WeatherCondition::Rain,
        1066 | 1069 | 1114 | 1117 | 1204..=1237 | 1249..=1264 => WeatherCondition::Snow,
        1087 | 1273..=1282 => WeatherCondition::Thunderstorm,
        _ => WeatherCondition::Clear,
    }
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
    country: String,
    lat: f64,
    lon: f64,
    #[serde(default = "utc")]
    tz_id: String,
}

fn utc() -> String {
    "UTC".to_string()
}

impl WaLocation {
    fn label(&self) -> String {
        format!("{}, {}", self.name, self.country)
    }
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
    code: u16,
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    last_updated_epoch: Option<i64>,
    temp_c: f64,
    feelslike_c: f64,
    humidity: u8,
    pressure_mb: f64,
    wind_kph: f64,
    wind_degree: u16,
    gust_kph: Option<f64>,
    precip_mm: Option<f64>,
    cloud: Option<u8>,
    vis_km: Option<f64>,
    uv: Option<f64>,
    dewpoint_c: Option<f64>,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    location: WaLocation,
    current: WaCurrent,
}

#[derive(Debug, Deserialize)]
struct WaForecastHour {
    time_epoch: i64,
    temp_c: f64,
    feelslike_c: f64,
    humidity: u8,
    pressure_mb: f64,
    wind_kph: f64,
    wind_degree: u16,
    gust_kph: Option<f64>,
    precip_mm: Option<f64>,
    cloud: Option<u8>,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    maxtemp_c: f64,
    avghumidity: Option<f64>,
    maxwind_kph: f64,
    totalprecip_mm: Option<f64>,
    uv: Option<f64>,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date_epoch: i64,
    day: WaDay,
    #[serde(default)]
    hour: Vec<WaForecastHour>,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    location: WaLocation,
    current: WaCurrent,
    forecast: WaForecast,
}

fn kph_to_mps(kph: f64) -> f64 {
    kph / 3.6
}

fn with_condition_icon(point: WeatherDataPoint, condition: &WaCondition) -> WeatherDataPoint {
    match &condition.icon {
        Some(icon) => point.with_icon(icon.clone()),
        None => point,
    }
}

fn current_point(current: &WaCurrent) -> WeatherDataPoint {
    let ts = current.last_updated_epoch.and_then(unix_to_utc).unwrap_or_else(Utc::now);
    let mut point = WeatherDataPoint::new(
        ts,
        current.temp_c,
        condition_for_code(current.condition.code),
        current.condition.text.clone(),
    )
    .with_feels_like(current.feelslike_c)
    .with_humidity(current.humidity)
    .with_pressure(current.pressure_mb.round() as u32)
    .with_wind(
        kph_to_mps(current.wind_kph),
        current.wind_degree,
        current.gust_kph.map(kph_to_mps),
    );

    if let Some(mm) = current.precip_mm {
        point = point.with_precipitation(mm);
    }
    if let Some(pct) = current.cloud {
        point = point.with_cloudiness(pct);
    }
    if let Some(km) = current.vis_km {
        point = point.with_visibility((km * 1000.0).round() as u32);
    }
    if let Some(uv) = current.uv {
        point = point.with_uv_index(uv);
    }
    if let Some(dew) = current.dewpoint_c {
        point = point.with_dew_point(dew);
    }
    with_condition_icon(point, &current.condition)
}

fn to_forecast(resp: WaForecastResponse) -> WeatherForecast {
    let mut forecast = WeatherForecast::new(
        resp.location.label(),
        resp.location.lat,
        resp.location.lon,
        resp.location.tz_id.clone(),
        current_point(&resp.current),
    );

    for day in &resp.forecast.forecastday {
        for hour in &day.hour {
            let Some(ts) = unix_to_utc(hour.time_epoch) else {
                continue;
            };
            let mut point = WeatherDataPoint::new(
                ts,
                hour.temp_c,
                condition_for_code(hour.condition.code),
                hour.condition.text.clone(),
            )
            .with_feels_like(hour.feelslike_c)
            .with_humidity(hour.humidity)
            .with_pressure(hour.pressure_mb.round() as u32)
            .with_wind(kph_to_mps(hour.wind_kph), hour.wind_degree, hour.gust_kph.map(kph_to_mps));
            if let Some(mm) = hour.precip_mm {
                point = point.with_precipitation(mm);
            }
            if let Some(pct) = hour.cloud {
                point = point.with_cloudiness(pct);
            }
            forecast.hourly.push(with_condition_icon(point, &hour.condition));
        }

        let Some(ts) = unix_to_utc(day.date_epoch) else {
            continue;
        };
        let d = &day.day;
        let mut point = WeatherDataPoint::new(
            ts,
            d.maxtemp_c,
            condition_for_code(d.condition.code),
            d.condition.text.clone(),
        )
        .with_humidity(d.avghumidity.unwrap_or(0.0).round().clamp(0.0, 100.0) as u8)
        .with_wind(kph_to_mps(d.maxwind_kph), 0, None);
        if let Some(mm) = d.totalprecip_mm {
            point = point.with_precipitation(mm);
        }
        if let Some(uv) = d.uv {
            point = point.with_uv_index(uv);
        }
        forecast.daily.push(with_condition_icon(point, &d.condition));
    }

    forecast
}

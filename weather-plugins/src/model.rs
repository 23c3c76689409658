use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque provider alert payload (severity, headline, ...).
pub type Alert = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherCondition {
    Clear,
    Clouds,
    Fog,
    Drizzle,
    Rain,
    Snow,
    Thunderstorm,
    Mist,
    Smoke,
    Haze,
    Dust,
    Sand,
    Ash,
    Squall,
    Tornado,
    Hurricane,
}

impl WeatherCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherCondition::Clear => "clear",
            WeatherCondition::Clouds => "clouds",
            WeatherCondition::Fog => "fog",
            WeatherCondition::Drizzle => "drizzle",
            WeatherCondition::Rain => "rain",
            WeatherCondition::Snow => "snow",
            WeatherCondition::Thunderstorm => "thunderstorm",
            WeatherCondition::Mist => "mist",
            WeatherCondition::Smoke => "smoke",
            WeatherCondition::Haze => "haze",
            WeatherCondition::Dust => "dust",
            WeatherCondition::Sand => "sand",
            WeatherCondition::Ash => "ash",
            WeatherCondition::Squall => "squall",
            WeatherCondition::Tornado => "tornado",
            WeatherCondition::Hurricane => "hurricane",
        }
    }

    pub const fn all() -> &'static [WeatherCondition] {
        &[
            WeatherCondition::Clear,
            WeatherCondition::Clouds,
            WeatherCondition::Fog,
            WeatherCondition::Drizzle,
            WeatherCondition::Rain,
            WeatherCondition::Snow,
            WeatherCondition::Thunderstorm,
            WeatherCondition::Mist,
            WeatherCondition::Smoke,
            WeatherCondition::Haze,
            WeatherCondition::Dust,
            WeatherCondition::Sand,
            WeatherCondition::Ash,
            WeatherCondition::Squall,
            WeatherCondition::Tornado,
            WeatherCondition::Hurricane,
        ]
    }
}

impl fmt::Display for WeatherCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for WeatherCondition {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.trim().to_lowercase();

        WeatherCondition::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| anyhow::anyhow!("Unknown weather condition '{value}'"))
    }
}

impl FromStr for WeatherCondition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WeatherCondition::try_from(s)
    }
}

/// A single observation or forecast slot.
///
/// Temperatures are in the provider's configured unit (Celsius unless the
/// plugin was set to imperial), wind speed likewise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherDataPoint {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity_pct: u8,
    pub pressure_hpa: u32,
    pub wind_speed: f64,
    pub wind_direction_deg: u16,
    pub wind_gust: Option<f64>,
    pub condition: WeatherCondition,
    pub description: String,
    pub icon: Option<String>,
    pub precipitation_mm: Option<f64>,
    pub cloudiness_pct: Option<u8>,
    pub visibility_m: Option<u32>,
    pub uv_index: Option<f64>,
    pub dew_point: Option<f64>,
}

impl WeatherDataPoint {
    /// Point with the required readings; everything else starts out empty.
    pub fn new(
        timestamp: DateTime<Utc>,
        temperature: f64,
        condition: WeatherCondition,
        description: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            temperature,
            feels_like: temperature,
            humidity_pct: 0,
            pressure_hpa: 0,
            wind_speed: 0.0,
            wind_direction_deg: 0,
            wind_gust: None,
            condition,
            description: description.into(),
            icon: None,
            precipitation_mm: None,
            cloudiness_pct: None,
            visibility_m: None,
            uv_index: None,
            dew_point: None,
        }
    }

    pub fn with_feels_like(mut self, feels_like: f64) -> Self {
        self.feels_like = feels_like;
        self
    }

    pub fn with_humidity(mut self, humidity_pct: u8) -> Self {
        self.humidity_pct = humidity_pct;
        self
    }

    pub fn with_pressure(mut self, pressure_hpa: u32) -> Self {
        self.pressure_hpa = pressure_hpa;
        self
    }

    pub fn with_wind(mut self, speed: f64, direction_deg: u16, gust: Option<f64>) -> Self {
        self.wind_speed = speed;
        self.wind_direction_deg = direction_deg;
        self.wind_gust = gust;
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_precipitation(mut self, mm: f64) -> Self {
        self.precipitation_mm = Some(mm);
        self
    }

    pub fn with_cloudiness(mut self, pct: u8) -> Self {
        self.cloudiness_pct = Some(pct);
        self
    }

    pub fn with_visibility(mut self, meters: u32) -> Self {
        self.visibility_m = Some(meters);
        self
    }

    pub fn with_uv_index(mut self, uv: f64) -> Self {
        self.uv_index = Some(uv);
        self
    }

    pub fn with_dew_point(mut self, dew_point: f64) -> Self {
        self.dew_point = Some(dew_point);
        self
    }
}

/// Everything one provider call returns for a location.
///
/// `hourly` and `daily` are in ascending timestamp order; gaps are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherForecast {
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub current: WeatherDataPoint,
    #[serde(default)]
    pub hourly: Vec<WeatherDataPoint>,
    #[serde(default)]
    pub daily: Vec<WeatherDataPoint>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

impl WeatherForecast {
    pub fn new(
        location: impl Into<String>,
        latitude: f64,
        longitude: f64,
        timezone: impl Into<String>,
        current: WeatherDataPoint,
    ) -> Self {
        Self {
            location: location.into(),
            latitude,
            longitude,
            timezone: timezone.into(),
            current,
            hourly: Vec::new(),
            daily: Vec::new(),
            alerts: Vec::new(),
        }
    }

    /// Hourly slot with exactly this timestamp.
    pub fn forecast_at(&self, timestamp: DateTime<Utc>) -> Option<&WeatherDataPoint> {
        self.hourly.iter().find(|p| p.timestamp == timestamp)
    }

    /// Same forecast with only the current observation kept.
    pub fn current_only(mut self) -> Self {
        self.hourly.clear();
        self.daily.clear();
        self
    }

    pub fn is_chronological(&self) -> bool {
        let ascending =
            |points: &[WeatherDataPoint]| points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp);
        ascending(&self.hourly) && ascending(&self.daily)
    }
}

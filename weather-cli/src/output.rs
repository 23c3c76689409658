//! Human-readable rendering of registry state and forecasts.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde_json::Value;
use weather_plugins::{
    PluginClass, PluginRegistry, WeatherDataPoint, WeatherForecast, schema::SECRET_MASK,
};

pub fn plugin_table(registry: &PluginRegistry) -> String {
    let mut out = String::new();
    let classes = registry.classes();
    if classes.is_empty() {
        out.push_str("No plugins registered.\n");
        return out;
    }

    let _ = writeln!(out, "{:<14} {:<17} {:<9} {:<8} {}", "NAME", "CAPABILITY", "VERSION", "ENABLED", "RUNNING");
    for class in classes {
        let name = class.name();
        let _ = writeln!(
            out,
            "{:<14} {:<17} {:<9} {:<8} {}",
            name,
            class.capability().as_str(),
            class.metadata().version,
            yes_no(registry.is_enabled(name)),
            yes_no(registry.is_live(name)),
        );
    }
    out
}

pub fn schema_listing(class: &PluginClass) -> String {
    let mut out = String::new();
    let meta = class.metadata();
    let _ = writeln!(out, "{} {} by {}", meta.name, meta.version, meta.author);
    if !meta.description.is_empty() {
        let _ = writeln!(out, "{}", meta.description);
    }

    if class.schema().is_empty() {
        out.push_str("\nThis plugin has no settings.\n");
        return out;
    }

    out.push('\n');
    for (name, spec) in class.schema().iter() {
        let mut flags = Vec::new();
        if spec.required {
            flags.push("required");
        }
        if spec.secret {
            flags.push("secret");
        }

        let _ = write!(out, "{name} ({})", spec.kind);
        if !flags.is_empty() {
            let _ = write!(out, " [{}]", flags.join(", "));
        }
        out.push('\n');

        let _ = writeln!(out, "    {}", spec.label);
        if !spec.description.is_empty() {
            let _ = writeln!(out, "    {}", spec.description);
        }
        if let Some(default) = &spec.default {
            let shown = if spec.secret { SECRET_MASK.to_string() } else { display_value(default) };
            let _ = writeln!(out, "    default: {shown}");
        }
        if !spec.options.is_empty() {
            let _ = writeln!(out, "    options: {}", spec.options.join(", "));
        }
        match (spec.min, spec.max) {
            (Some(min), Some(max)) => {
                let _ = writeln!(out, "    range: {min}..={max}");
            }
            (Some(min), None) => {
                let _ = writeln!(out, "    min: {min}");
            }
            (None, Some(max)) => {
                let _ = writeln!(out, "    max: {max}");
            }
            (None, None) => {}
        }
    }
    out
}

pub fn forecast_report(forecast: &WeatherForecast) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} [{:.2}, {:.2}] ({})",
        forecast.location, forecast.latitude, forecast.longitude, forecast.timezone
    );

    let now = &forecast.current;
    let _ = writeln!(
        out,
        "Now ({}): {:.1}° {} (feels like {:.1}°)",
        format_time(now.timestamp),
        now.temperature,
        now.description,
        now.feels_like
    );
    let _ = writeln!(
        out,
        "  humidity {}%, pressure {} hPa, wind {:.1} m/s from {}°",
        now.humidity_pct, now.pressure_hpa, now.wind_speed, now.wind_direction_deg
    );

    if !forecast.daily.is_empty() {
        out.push_str("\nDaily:\n");
        for day in &forecast.daily {
            let _ = writeln!(out, "  {}", day_line(day));
        }
    }

    if !forecast.alerts.is_empty() {
        let _ = writeln!(out, "\n{} weather alert(s) in effect.", forecast.alerts.len());
    }
    out
}

fn day_line(point: &WeatherDataPoint) -> String {
    let mut line = format!(
        "{}  {:>5.1}°  {}",
        point.timestamp.format("%a %Y-%m-%d"),
        point.temperature,
        point.description
    );
    if let Some(mm) = point.precipitation_mm.filter(|mm| *mm > 0.0) {
        let _ = write!(line, ", {mm:.1} mm");
    }
    line
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use weather_plugins::{
        ConfigFieldSpec, ConfigSchema, PluginMetadata, WeatherCondition, feature::HistoryFeature,
    };

    fn point(day: u32, temp: f64) -> WeatherDataPoint {
        let ts = Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap();
        WeatherDataPoint::new(ts, temp, WeatherCondition::Rain, "light rain").with_precipitation(1.5)
    }

    #[test]
    fn forecast_report_lists_days() {
        let mut forecast = WeatherForecast::new("Oslo", 59.91, 10.75, "Europe/Oslo", point(1, 12.0));
        forecast.daily = vec![point(1, 14.0), point(2, 9.5)];

        let text = forecast_report(&forecast);
        assert!(text.starts_with("Oslo [59.91, 10.75] (Europe/Oslo)"));
        assert!(text.contains("Now (2024-05-01 12:00 UTC): 12.0° light rain"));
        assert!(text.contains("Thu 2024-05-02    9.5°  light rain, 1.5 mm"));
        assert_eq!(text.matches("light rain").count(), 3);
    }

    #[test]
    fn schema_listing_masks_secret_defaults() {
        let schema = ConfigSchema::new()
            .field("token", ConfigFieldSpec::string("Token").secret().default_value("hunter2hunter2"))
            .field("units", ConfigFieldSpec::choice("Units", ["metric", "imperial"]).default_value("metric"));
        let class = PluginClass::feature("demo", PluginMetadata::new("demo"), schema, |_| Ok(HistoryFeature::new(1)));

        let text = schema_listing(&class);
        assert!(text.contains("token (string) [secret]"));
        assert!(text.contains(SECRET_MASK));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("options: metric, imperial"));
    }
}

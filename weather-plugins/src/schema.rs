//! Declarative plugin configuration schemas.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{FieldIssue, SchemaError},
    store::PluginConfig,
};

/// Placeholder shown instead of secret values.
pub const SECRET_MASK: &str = "********";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    Enum,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::Enum => "enum",
        })
    }
}

/// One field of a plugin's settings form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFieldSpec {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
    /// UI should mask the value.
    #[serde(default)]
    pub secret: bool,
}

impl ConfigFieldSpec {
    pub fn new(kind: FieldKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            description: String::new(),
            default: None,
            min: None,
            max: None,
            options: Vec::new(),
            required: false,
            secret: false,
        }
    }

    pub fn string(label: impl Into<String>) -> Self {
        Self::new(FieldKind::String, label)
    }

    pub fn int(label: impl Into<String>) -> Self {
        Self::new(FieldKind::Int, label)
    }

    pub fn float(label: impl Into<String>) -> Self {
        Self::new(FieldKind::Float, label)
    }

    pub fn bool(label: impl Into<String>) -> Self {
        Self::new(FieldKind::Bool, label)
    }

    pub fn choice<I, S>(label: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = Self::new(FieldKind::Enum, label);
        spec.options = options.into_iter().map(Into::into).collect();
        spec
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn default_value(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Checks one present value against this spec.
    fn check(&self, value: &Value) -> Result<(), String> {
        let type_ok = match self.kind {
            FieldKind::String => value.is_string(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Enum => value.is_string(),
        };
        if !type_ok {
            return Err(format!("must be a {}", self.kind));
        }

        if self.kind == FieldKind::Enum {
            let s = value.as_str().unwrap_or_default();
            if !self.options.iter().any(|o| o == s) {
                return Err(format!("must be one of: {}", self.options.join(", ")));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min.filter(|min| n < *min) {
                return Err(format!("must be at least {min}"));
            }
            if let Some(max) = self.max.filter(|max| n > *max) {
                return Err(format!("must be at most {max}"));
            }
        }

        if self.required && value.as_str().is_some_and(|s| s.trim().is_empty()) {
            return Err("is required".to_string());
        }

        Ok(())
    }
}

/// Ordered field name -> spec map; order is the order fields are shown in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSchema {
    fields: IndexMap<String, ConfigFieldSpec>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, spec: ConfigFieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ConfigFieldSpec> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigFieldSpec)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Inserts the default of every declared field missing from `config`.
    ///
    /// Keys the schema does not declare pass through untouched, and applying
    /// this twice gives the same result as applying it once.
    pub fn apply_defaults(&self, mut config: PluginConfig) -> PluginConfig {
        for (name, spec) in &self.fields {
            if config.contains_key(name) {
                continue;
            }
            if let Some(default) = &spec.default {
                config.insert(name.clone(), default.clone());
            }
        }
        config
    }

    /// Checks declared fields only. Null counts as absent.
    pub fn validate(&self, config: &PluginConfig) -> Result<(), SchemaError> {
        let mut issues = Vec::new();

        for (name, spec) in &self.fields {
            match config.get(name).filter(|v| !v.is_null()) {
                Some(value) => {
                    if let Err(reason) = spec.check(value) {
                        issues.push(FieldIssue { field: name.clone(), reason });
                    }
                }
                None if spec.required => issues.push(FieldIssue {
                    field: name.clone(),
                    reason: "is required".to_string(),
                }),
                None => {}
            }
        }

        if issues.is_empty() { Ok(()) } else { Err(SchemaError { issues }) }
    }

    /// Copy of `config` safe to print: non-empty secret values are masked.
    pub fn masked(&self, config: &PluginConfig) -> PluginConfig {
        let mut out = config.clone();
        for (name, spec) in self.fields.iter().filter(|(_, spec)| spec.secret) {
            if let Some(value) = out.get_mut(name) {
                if value.as_str().is_some_and(|s| !s.is_empty()) {
                    *value = Value::String(SECRET_MASK.to_string());
                }
            }
        }
        out
    }

    /// Parses user text (CLI, form input) into a value of the field's type.
    /// Undeclared keys are read as JSON when possible, otherwise as text.
    pub fn parse_input(&self, name: &str, raw: &str) -> Result<Value, String> {
        let Some(spec) = self.fields.get(name) else {
            return Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())));
        };

        let value = match spec.kind {
            FieldKind::String | FieldKind::Enum => Value::String(raw.to_string()),
            FieldKind::Int => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("`{name}` expects an integer, got '{raw}'"))?,
            FieldKind::Float => raw
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| format!("`{name}` expects a number, got '{raw}'"))?,
            FieldKind::Bool => match raw.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Value::Bool(true),
                "false" | "no" | "off" | "0" => Value::Bool(false),
                _ => return Err(format!("`{name}` expects true or false, got '{raw}'")),
            },
        };

        spec.check(&value).map_err(|reason| format!("`{name}` {reason}"))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .field(
                "api_key",
                ConfigFieldSpec::string("API Key").required().secret(),
            )
            .field(
                "units",
                ConfigFieldSpec::choice("Units", ["metric", "imperial"]).default_value("metric"),
            )
            .field(
                "max_entries",
                ConfigFieldSpec::int("Max entries").range(1.0, 500.0).default_value(100),
            )
            .field("use_https", ConfigFieldSpec::bool("Use HTTPS").default_value(true))
    }

    fn config(value: Value) -> PluginConfig {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn apply_defaults_fills_only_missing_fields() {
        let out = schema().apply_defaults(config(json!({ "units": "imperial" })));

        assert_eq!(out["units"], json!("imperial"));
        assert_eq!(out["max_entries"], json!(100));
        assert_eq!(out["use_https"], json!(true));
        assert!(!out.contains_key("api_key"), "no default declared");
    }

    #[test]
    fn apply_defaults_is_idempotent() {
        let s = schema();
        let once = s.apply_defaults(config(json!({ "extra": [1, 2] })));
        let twice = s.apply_defaults(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn undeclared_fields_pass_through_unvalidated() {
        let s = schema();
        let cfg = config(json!({ "api_key": "0123456789", "future_option": { "nested": true } }));

        let out = s.apply_defaults(cfg);
        assert_eq!(out["future_option"], json!({ "nested": true }));
        assert!(s.validate(&out).is_ok());
    }

    #[test]
    fn schema_preserves_declaration_order() {
        let names: Vec<_> = schema().iter().map(|(name, _)| name.clone()).collect();
        assert_eq!(names, ["api_key", "units", "max_entries", "use_https"]);
    }

    #[test]
    fn validate_reports_every_issue() {
        let cfg = config(json!({ "units": "kelvin", "max_entries": 0, "use_https": "yes" }));
        let err = schema().validate(&cfg).unwrap_err();

        let fields: Vec<_> = err.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, ["api_key", "units", "max_entries", "use_https"]);
        assert!(err.to_string().contains("must be one of: metric, imperial"));
    }

    #[test]
    fn blank_required_string_is_rejected() {
        let cfg = config(json!({ "api_key": "   " }));
        let err = schema().validate(&cfg).unwrap_err();
        assert_eq!(err.issues[0].reason, "is required");
    }

    #[test]
    fn masked_hides_secrets_only() {
        let cfg = config(json!({ "api_key": "supersecretkey", "units": "metric" }));
        let masked = schema().masked(&cfg);
        assert_eq!(masked["api_key"], json!(SECRET_MASK));
        assert_eq!(masked["units"], json!("metric"));
    }

    #[test]
    fn parse_input_follows_field_kind() {
        let s = schema();
        assert_eq!(s.parse_input("max_entries", "42").unwrap(), json!(42));
        assert_eq!(s.parse_input("use_https", "off").unwrap(), json!(false));
        assert_eq!(s.parse_input("unknown", "[1,2]").unwrap(), json!([1, 2]));
        assert_eq!(s.parse_input("unknown", "plain").unwrap(), json!("plain"));

        assert!(s.parse_input("max_entries", "lots").is_err());
        assert!(s.parse_input("max_entries", "900").unwrap_err().contains("at most 500"));
        assert!(s.parse_input("units", "kelvin").is_err());
    }

    #[test]
    fn schema_round_trips_through_json() {
        let s = schema();
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["api_key"]["type"], json!("string"));
        assert_eq!(json["api_key"]["secret"], json!(true));

        let back: ConfigSchema = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }
}

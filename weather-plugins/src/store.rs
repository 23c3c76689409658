//! File-backed plugin configuration document.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::anyhow;
use directories::ProjectDirs;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::{error::StoreError, plugin::PluginClass};

/// Field name -> value, as handed to a plugin instance.
pub type PluginConfig = serde_json::Map<String, Value>;

/// Plugin id -> config; the whole on-disk document.
pub type ConfigDocument = BTreeMap<String, PluginConfig>;

/// Reserved key; `false` means the plugin must not be invoked.
pub const ENABLED_KEY: &str = "_enabled";

/// Missing or non-boolean `_enabled` counts as enabled.
pub fn is_enabled(config: &PluginConfig) -> bool {
    config.get(ENABLED_KEY).and_then(Value::as_bool).unwrap_or(true)
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> anyhow::Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-task", "weather-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("plugins.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole document. A missing file is an empty document; an
    /// unreadable or corrupt one is logged and also treated as empty so the
    /// host can still start. A plugin entry that is not an object is logged
    /// and skipped without losing the others.
    pub fn load(&self) -> ConfigDocument {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no plugin config file yet");
                return ConfigDocument::new();
            }
            Err(err) => {
                error!(path = %self.path.display(), "failed to read plugin config: {err}");
                return ConfigDocument::new();
            }
        };

        let entries = match serde_json::from_str::<serde_json::Map<String, Value>>(&contents) {
            Ok(entries) => entries,
            Err(err) => {
                error!(path = %self.path.display(), "plugin config is corrupt, ignoring it: {err}");
                return ConfigDocument::new();
            }
        };

        let mut doc = ConfigDocument::new();
        for (id, entry) in entries {
            match entry {
                Value::Object(config) => {
                    doc.insert(id, config);
                }
                other => {
                    warn!(path = %self.path.display(), plugin = %id, "ignoring non-object plugin config entry: {other}");
                }
            }
        }

        debug!(path = %self.path.display(), plugins = doc.len(), "loaded plugin config");
        doc
    }

    /// Writes the whole document. The new content goes to a sibling temp
    /// file first and is renamed over the target.
    pub fn save(&self, doc: &ConfigDocument) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io { path: self.path.clone(), source };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(doc)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        debug!(path = %self.path.display(), plugins = doc.len(), "saved plugin config");
        Ok(())
    }

    /// Fills schema defaults for `class` into `config`.
    pub fn apply_defaults(class: &PluginClass, config: PluginConfig) -> PluginConfig {
        class.schema().apply_defaults(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use serde_json::json;

    fn doc(value: Value) -> ConfigDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("plugins.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn save_then_load_returns_exact_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config").join("plugins.json"));

        let saved = doc(json!({ "alpha": { "units": "metric" } }));
        store.save(&saved).unwrap();

        // a fresh store stands in for a fresh process
        let reloaded = ConfigStore::new(store.path()).load();
        assert_eq!(reloaded, saved);
        assert_eq!(serde_json::to_value(&reloaded).unwrap(), json!({ "alpha": { "units": "metric" } }));
    }

    #[test]
    fn save_preserves_other_plugins_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("plugins.json"));

        let mut document = doc(json!({
            "alpha": { "units": "metric", "_enabled": true },
            "beta": { "api_key": "0123456789" }
        }));
        store.save(&document).unwrap();

        document.get_mut("alpha").unwrap().insert("units".into(), json!("imperial"));
        store.save(&document).unwrap();

        let reloaded = store.load();
        assert_eq!(reloaded["beta"]["api_key"], json!("0123456789"));
        assert_eq!(reloaded["alpha"]["units"], json!("imperial"));
        assert!(!dir.path().join("plugins.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(ConfigStore::new(&path).load().is_empty());
    }

    #[test]
    fn non_object_plugin_entry_is_skipped_and_others_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        fs::write(&path, r#"{ "alpha": [1, 2, 3], "beta": { "api_key": "0123456789" }, "gamma": null }"#).unwrap();
        let store = ConfigStore::new(&path);

        let loaded = store.load();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), ["beta"]);
        assert_eq!(loaded["beta"]["api_key"], json!("0123456789"));

        store.save(&loaded).unwrap();
        assert_eq!(store.load(), loaded);
    }

    #[test]
    fn top_level_array_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(ConfigStore::new(&path).load().is_empty());
    }

    #[test]
    fn enabled_flag_defaults_to_true() {
        let cfg = |v: Value| v.as_object().cloned().unwrap();
        assert!(is_enabled(&cfg(json!({}))));
        assert!(is_enabled(&cfg(json!({ "_enabled": true }))));
        assert!(is_enabled(&cfg(json!({ "_enabled": "no" }))));
        assert!(!is_enabled(&cfg(json!({ "_enabled": false }))));
    }

    #[test]
    fn apply_defaults_uses_the_class_schema() {
        let class = test_support::provider_class("alpha");
        let out = ConfigStore::apply_defaults(&class, PluginConfig::new());
        assert_eq!(out["units"], json!("metric"));
    }
}

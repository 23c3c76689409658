use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::legacy::WorkerPool;

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "weather-task", "weather-cli")
        .ok_or_else(|| anyhow!("Could not determine platform config directory"))
}

/// Host settings stored on disk (TOML). Per-plugin settings live in the
/// separate JSON document managed by [`crate::ConfigStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directories scanned for plugin descriptors.
    ///
    /// Example TOML:
    /// plugin_dirs = ["/usr/share/weather/plugins", "~/.config/weather/plugins"]
    pub plugin_dirs: Vec<PathBuf>,

    /// Override for the plugin config document; platform default otherwise.
    pub plugin_config: Option<PathBuf>,

    /// Register every built-in plugin even without a descriptor on disk.
    pub register_builtins: bool,

    /// Provider selected when a command does not name one.
    pub default_provider: Option<String>,

    /// Worker threads available to legacy (blocking) providers.
    pub legacy_workers: usize,

    /// Upper bound on a single blocking provider call.
    pub legacy_timeout_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: Vec::new(),
            plugin_config: None,
            register_builtins: true,
            default_provider: None,
            legacy_workers: WorkerPool::DEFAULT_SIZE,
            legacy_timeout_secs: WorkerPool::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl HostConfig {
    /// Load config from the platform location, or defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, use defaults plus the user plugin dir.
            let mut cfg = Self::default();
            if let Ok(dir) = Self::user_plugin_dir() {
                cfg.plugin_dirs.push(dir);
            }
            return Ok(cfg);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: HostConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to the platform location, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the host config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    pub fn user_plugin_dir() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("plugins"))
    }

    /// Where the plugin config document lives.
    pub fn plugin_config_path(&self) -> Result<PathBuf> {
        match &self.plugin_config {
            Some(path) => Ok(path.clone()),
            None => crate::store::ConfigStore::default_path(),
        }
    }

    pub fn legacy_timeout(&self) -> Duration {
        Duration::from_secs(self.legacy_timeout_secs.max(1))
    }

    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(self.legacy_workers, self.legacy_timeout())
    }

    pub fn set_default_provider(&mut self, name: impl Into<String>) {
        self.default_provider = Some(name.into());
    }

    /// The provider to use when none is named explicitly.
    pub fn default_provider(&self) -> Result<&str> {
        self.default_provider.as_deref().ok_or_else(|| {
            anyhow!(
                "No default provider configured.\n\
                 Hint: pass `--provider <name>` or set `default_provider` in {}.",
                Self::config_file_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "config.toml".to_string())
            )
        })
    }
}

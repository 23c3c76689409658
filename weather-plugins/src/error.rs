//! Typed failures of the plugin runtime.
//!
//! Bulk operations (directory scans, registration) absorb these and log them;
//! explicit single-target operations (`create`, fetch dispatch) hand them back
//! to the caller.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::plugin::Capability;

/// A plugin descriptor on disk could not be turned into a plugin class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("invalid plugin spec {}: {reason}", .path.display())]
    InvalidSpec { path: PathBuf, reason: String },

    #[error("no PLUGIN_CLASS entry point in {}", .path.display())]
    MissingEntryPoint { path: PathBuf },

    #[error("PLUGIN_CLASS in {} is not a usable plugin class: {reason}", .path.display())]
    WrongCapability { path: PathBuf, reason: String },
}

impl LoadError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            LoadError::InvalidSpec { path, .. }
            | LoadError::MissingEntryPoint { path }
            | LoadError::WrongCapability { path, .. } => path,
        }
    }
}

/// Raised by a plugin (or its factory) when it cannot start with the
/// configuration it was given.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(
        "{plugin} requires `{key}`. Please configure it in the plugin settings.\n\
         You can usually get one by signing up at the provider's website."
    )]
    MissingSetting { plugin: String, key: String },

    #[error("invalid value for `{key}` in {plugin}: {reason}")]
    InvalidSetting {
        plugin: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("a plugin named '{0}' is already registered")]
    DuplicateName(String),

    /// The class stays registered; only the instance is missing.
    #[error("failed to create an instance of plugin '{name}': {source}")]
    ConstructionFailed {
        name: String,
        #[source]
        source: InitError,
    },
}

/// Failure of the registry's explicit "give me an instance of X" path.
#[derive(Debug, Error)]
pub enum InstantiateError {
    #[error("unknown plugin '{0}'")]
    Unknown(String),

    #[error("plugin '{0}' is disabled")]
    Disabled(String),

    #[error("plugin '{name}' is not a {expected}")]
    WrongCapability { name: String, expected: Capability },

    #[error("{source}")]
    Construction {
        name: String,
        #[source]
        source: InitError,
    },
}

#[derive(Debug, Error)]
#[error("failed to initialize provider '{name}': {source}")]
pub struct ProviderInitError {
    pub name: String,
    #[source]
    pub source: InstantiateError,
}

/// The registry refuses to hand out a plugin for invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("plugin '{0}' is disabled")]
    Disabled(String),

    #[error("plugin '{0}' has no live instance")]
    NotLoaded(String),
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no active weather provider; select one before fetching")]
    NoActiveProvider,

    #[error(transparent)]
    ProviderInit(#[from] ProviderInitError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A provider's own failure, passed through untouched.
    #[error(transparent)]
    Fetch(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("legacy provider '{0}' is not initialized")]
    NotInitialized(String),

    #[error("legacy provider '{0}' has been cleaned up")]
    Closed(String),

    #[error("legacy provider '{name}' did not answer within {after:?}")]
    TimedOut { name: String, after: Duration },

    #[error("worker running legacy provider '{0}' panicked")]
    WorkerPanicked(String),

    #[error("worker pool is shut down")]
    PoolClosed,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write plugin config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize plugin config: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub reason: String,
}

impl std::fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}` {}", self.field, self.reason)
    }
}

/// Every schema violation found in one config, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct SchemaError {
    pub issues: Vec<FieldIssue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_messages_name_the_file() {
        let err = LoadError::MissingEntryPoint {
            path: PathBuf::from("plugins/alpha.toml"),
        };
        assert_eq!(err.to_string(), "no PLUGIN_CLASS entry point in plugins/alpha.toml");
        assert_eq!(err.path(), std::path::Path::new("plugins/alpha.toml"));
    }

    #[test]
    fn provider_init_error_surfaces_the_plugin_message() {
        let err = ProviderInitError {
            name: "openweather".into(),
            source: InstantiateError::Construction {
                name: "openweather".into(),
                source: InitError::MissingSetting {
                    plugin: "openweather".into(),
                    key: "api_key".into(),
                },
            },
        };

        let msg = err.to_string();
        assert!(msg.starts_with("failed to initialize provider 'openweather'"));
        assert!(msg.contains("requires `api_key`"));
    }

    #[test]
    fn schema_error_joins_all_issues() {
        let err = SchemaError {
            issues: vec![
                FieldIssue { field: "units".into(), reason: "must be one of: metric, imperial".into() },
                FieldIssue { field: "api_key".into(), reason: "is required".into() },
            ],
        };
        assert_eq!(
            err.to_string(),
            "`units` must be one of: metric, imperial; `api_key` is required"
        );
    }
}

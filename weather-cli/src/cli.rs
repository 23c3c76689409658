use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use inquire::{Confirm, Password, Select, Text};
use weather_plugins::{
    ConfigFieldSpec, FieldKind, HostConfig, LoadReport, PluginClass, PluginHost, PluginRegistry,
};

use crate::output;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Weather CLI with pluggable providers")]
pub struct Cli {
    /// Log filter, e.g. "info" or "weather_plugins=debug". RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Host config file; the platform config directory is used otherwise.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect installed plugins.
    Plugins {
        #[command(subcommand)]
        command: PluginsCommand,
    },

    /// Read or change a plugin's settings.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Show weather for a location.
    Show {
        /// Place name, or "lat,lon".
        location: String,

        /// Provider short name, e.g. "openmeteo" or "weatherapi".
        #[arg(long)]
        provider: Option<String>,

        /// Forecast length in days; current conditions only when absent.
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Debug, Subcommand)]
pub enum PluginsCommand {
    /// Registered plugins and the outcome of loading them.
    List,

    /// Settings a plugin accepts.
    Schema { name: String },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print a plugin's settings (secrets masked).
    Get { plugin: String },

    /// Change one setting. Prompts for the value when it is omitted.
    Set {
        plugin: String,
        key: String,
        value: Option<String>,
    },

    Enable { plugin: String },

    Disable { plugin: String },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let host_config = match &self.config {
            Some(path) => HostConfig::load_from(path)?,
            None => HostConfig::load()?,
        };

        let host = PluginHost::new(host_config)?;
        let report = host.start();

        let result = match self.command {
            Command::Plugins { command } => plugins(&host, &report, command),
            Command::Config { command } => config(host.registry(), command),
            Command::Show { location, provider, days } => show(&host, &location, provider, days).await,
        };

        host.shutdown();
        result
    }
}

fn plugins(host: &PluginHost, report: &LoadReport, command: PluginsCommand) -> Result<()> {
    let registry = host.registry();

    match command {
        PluginsCommand::List => {
            print!("{}", output::plugin_table(registry));
            println!("{}", report.summary());
            for err in &report.failed {
                println!("  failed: {err}");
            }
            for name in &report.uninstantiated {
                println!("  not started: {name} (see `weather config get {name}`)");
            }
        }
        PluginsCommand::Schema { name } => {
            let class = known_class(registry, &name)?;
            print!("{}", output::schema_listing(&class));
        }
    }

    Ok(())
}

fn config(registry: &PluginRegistry, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Get { plugin } => {
            let class = known_class(registry, &plugin)?;
            let config = registry.get_config(&plugin);

            println!("{}", serde_json::to_string_pretty(&class.schema().masked(&config))?);
            if let Err(err) = class.schema().validate(&config) {
                println!("warning: {err}");
            }
        }
        ConfigCommand::Set { plugin, key, value } => {
            let class = known_class(registry, &plugin)?;
            let raw = match value {
                Some(raw) => raw,
                None => prompt_value(&key, class.schema().get(&key))?,
            };

            let parsed = class.schema().parse_input(&key, &raw).map_err(|msg| anyhow!(msg))?;
            let mut stored = registry.stored_config(&plugin);
            stored.insert(key.clone(), parsed);
            registry.set_config(&plugin, stored)?;

            println!("Saved `{key}` for {plugin}.");
            if !registry.is_live(&plugin) && registry.is_enabled(&plugin) {
                println!("{plugin} is still not running; check the log for the reason.");
            }
        }
        ConfigCommand::Enable { plugin } => {
            known_class(registry, &plugin)?;
            registry.set_enabled(&plugin, true)?;
            println!("{plugin} enabled.");
        }
        ConfigCommand::Disable { plugin } => {
            known_class(registry, &plugin)?;
            registry.set_enabled(&plugin, false)?;
            println!("{plugin} disabled.");
        }
    }

    Ok(())
}

async fn show(host: &PluginHost, location: &str, provider: Option<String>, days: Option<u32>) -> Result<()> {
    match provider {
        Some(name) => host.select_provider(&name)?,
        None if host.providers().active_name().is_none() => {
            let name = host.config().default_provider()?;
            host.select_provider(name)?;
        }
        None => {}
    }

    let forecast = host
        .fetch(location, days)
        .await
        .with_context(|| format!("Could not get weather for '{location}'"))?;

    print!("{}", output::forecast_report(&forecast));
    Ok(())
}

fn known_class(registry: &PluginRegistry, name: &str) -> Result<PluginClass> {
    registry
        .class(name)
        .ok_or_else(|| anyhow!("Unknown plugin '{name}'. Run `weather plugins list` to see what is installed."))
}

fn prompt_value(key: &str, spec: Option<&ConfigFieldSpec>) -> Result<String> {
    let Some(spec) = spec else {
        return Ok(Text::new(&format!("{key}:")).prompt()?);
    };

    let prompt = format!("{}:", spec.label);
    let value = if spec.secret {
        Password::new(&prompt).without_confirmation().prompt()?
    } else {
        match spec.kind {
            FieldKind::Enum => Select::new(&prompt, spec.options.clone()).prompt()?,
            FieldKind::Bool => Confirm::new(&prompt).with_default(false).prompt()?.to_string(),
            _ => {
                let text = Text::new(&prompt);
                if spec.description.is_empty() {
                    text.prompt()?
                } else {
                    text.with_help_message(&spec.description).prompt()?
                }
            }
        }
    };

    if value.trim().is_empty() && spec.required {
        bail!("`{key}` is required and cannot be empty");
    }
    Ok(value)
}

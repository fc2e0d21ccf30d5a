//! Layered configuration.
//!
//! Priority, lowest to highest: built-in defaults, config file
//! (`--config` / `CONFIG_FILE`, else `./config.yaml` when present),
//! `CHAT_WIDGET_`-prefixed environment variables (e.g.
//! `CHAT_WIDGET_SERVER__PORT=8080`), explicit CLI flags.

use std::path::Path;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::session::DEFAULT_SESSION_TIMEOUT;
use crate::widget::{DEFAULT_TIME_FORMAT, WidgetOptions};

/// Config file picked up from the working directory when none is given.
const CWD_CONFIG_FILE: &str = "config.yaml";

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "CHAT_WIDGET";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "BIND_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Remote chat endpoint URL
    #[arg(long, env = "CHAT_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub endpoint: EndpointConfig,
    pub widget: WidgetConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory served under `/static`.
    pub static_dir: String,
    /// Page title.
    pub title: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    /// Full URL of the remote chat endpoint.
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WidgetConfig {
    pub time_format: String,
    pub history_limit: Option<usize>,
    pub lock_while_pending: bool,
    pub session_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub json: bool,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl WidgetConfig {
    #[must_use]
    pub fn options(&self) -> WidgetOptions {
        WidgetOptions {
            time_format: self.time_format.clone(),
            history_limit: self.history_limit,
            lock_while_pending: self.lock_while_pending,
        }
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.static_dir", "static")?
            .set_default("server.title", "Chat")?
            .set_default("endpoint.url", "http://127.0.0.1:8000/chat")?
            .set_default("widget.time_format", DEFAULT_TIME_FORMAT)?
            .set_default("widget.lock_while_pending", false)?
            .set_default("widget.session_ttl_secs", DEFAULT_SESSION_TIMEOUT.as_secs())?
            .set_default("logging.json", false)?
            .set_default("logging.filter", "info")?;

        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path).required(true));
        } else if Path::new(CWD_CONFIG_FILE).exists() {
            builder = builder.add_source(File::with_name(CWD_CONFIG_FILE).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(url) = cli.endpoint {
            builder = builder.set_override("endpoint.url", url)?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("logging.json", json)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.url.trim().is_empty() {
            return Err(ConfigError::Message("endpoint.url cannot be empty".to_string()));
        }
        if self.widget.history_limit == Some(0) {
            return Err(ConfigError::Message(
                "widget.history_limit must be at least 1 when set".to_string(),
            ));
        }
        if StrftimeItems::new(&self.widget.time_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::Message(format!(
                "widget.time_format is not a valid strftime layout: {}",
                self.widget.time_format
            )));
        }
        Ok(())
    }
}

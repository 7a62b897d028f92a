//! Configuration management.
//!
//! Values come from, in increasing precedence: built-in defaults, the JSON
//! config file, `CMDRELAY_*` environment variables, and CLI flags (applied
//! by the binary).

use crate::{CoreError, CoreResult, Paths};
use command_protocol::CodecKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Default listener interface.
pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";
/// Preferred port of the request engine.
pub const DEFAULT_REQUEST_PORT: u16 = 12345;
/// Preferred port of the response engine.
pub const DEFAULT_RESPONSE_PORT: u16 = 12346;
/// Consecutive forwarding failures tolerated; negative means unlimited.
pub const DEFAULT_MAX_FAILURES: i32 = -1;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 10_000;

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level or `EnvFilter` directive.
    pub log_level: String,
    /// Interface engines bind to.
    pub bind_host: String,
    /// Host advertised to peers as callback; defaults to `bind_host`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertised_host: Option<String>,
    pub request_port: u16,
    pub response_port: u16,
    pub max_failures: i32,
    pub codec: CodecKind,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            bind_host: DEFAULT_BIND_HOST.to_string(),
            advertised_host: None,
            request_port: DEFAULT_REQUEST_PORT,
            response_port: DEFAULT_RESPONSE_PORT,
            max_failures: DEFAULT_MAX_FAILURES,
            codec: CodecKind::default(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            debug!(path = %config_path.display(), "Loading config file");
            Self::load_from_file(&config_path)?
        } else {
            debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };

        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        debug!(path = %paths.config_file().display(), "Saved config file");
        Ok(())
    }

    /// Override configuration from `CMDRELAY_*` environment variables.
    pub fn load_from_env(&mut self) -> CoreResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an environment-like lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let value = lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
            if value.is_some() {
                debug!(variable = name, "Config override from environment");
            }
            value
        };

        if let Some(level) = var("CMDRELAY_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(host) = var("CMDRELAY_BIND_HOST") {
            self.bind_host = host;
        }
        if let Some(host) = var("CMDRELAY_ADVERTISED_HOST") {
            self.advertised_host = Some(host);
        }
        if let Some(port) = var("CMDRELAY_REQUEST_PORT") {
            self.request_port = parse_env("CMDRELAY_REQUEST_PORT", &port)?;
        }
        if let Some(port) = var("CMDRELAY_RESPONSE_PORT") {
            self.response_port = parse_env("CMDRELAY_RESPONSE_PORT", &port)?;
        }
        if let Some(max) = var("CMDRELAY_MAX_FAILURES") {
            self.max_failures = parse_env("CMDRELAY_MAX_FAILURES", &max)?;
        }
        if let Some(codec) = var("CMDRELAY_CODEC") {
            self.codec = codec.parse().map_err(CoreError::Config)?;
        }
        Ok(())
    }

    /// Reject combinations the engines cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.bind_host.trim().is_empty() {
            return Err(CoreError::Config("bind_host must not be empty".to_string()));
        }
        if self.request_port != 0 && self.request_port == self.response_port {
            return Err(CoreError::Config(format!(
                "request_port and response_port are both {}",
                self.request_port
            )));
        }
        if self.connect_timeout_ms == 0 || self.io_timeout_ms == 0 {
            return Err(CoreError::Config("timeouts must be positive".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Host peers should use to reach local engines.
    pub fn advertised_host(&self) -> &str {
        self.advertised_host.as_deref().unwrap_or(&self.bind_host)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> CoreResult<T> {
    value
        .parse()
        .map_err(|_| CoreError::Config(format!("{name} has invalid value '{value}'")))
}

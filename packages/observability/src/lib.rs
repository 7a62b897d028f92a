//! # Observability
//!
//! Logging setup shared by every cmdrelay binary.
//!
//! Services call [`init_with_config`] once at startup and use the standard
//! `tracing` macros everywhere else. Depending on [`LogConfig`], events go to:
//!
//! - stderr, in the compact human format
//! - a JSONL file, one [`LogEntry`] per line, safe to share between processes
//! - a [`LogTap`], where in-process consumers (such as the log forwarder)
//!   receive each entry as a value
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "cmdrelay".into(),
//!         default_level: "debug".into(),
//!         ..Default::default()
//!     })
//!     .expect("logging");
//!
//!     tracing::info!("service started");
//! }
//! ```

mod json_layer;
mod tap;
mod writer;

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use json_layer::{JsonLayer, LogEntry};
pub use tap::{LogTap, TapLayer, DEFAULT_TAP_CAPACITY};
pub use writer::LogFileWriter;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every structured entry.
    pub service_name: String,

    /// Default level filter (e.g., "debug", "info", "warn").
    /// `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// JSONL log file. No file output when unset.
    pub log_path: Option<PathBuf>,

    /// Emit compact logs to stderr.
    pub also_stderr: bool,

    /// Publish every entry to this tap.
    pub tap: Option<LogTap>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
            tap: None,
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("A global subscriber is already installed")]
    AlreadyInitialized,
}

/// Initialize logging with default settings.
pub fn init(service_name: &str) -> Result<(), InitError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging with custom configuration.
pub fn init_with_config(config: LogConfig) -> Result<(), InitError> {
    let file_layer = match &config.log_path {
        Some(path) => {
            let writer = LogFileWriter::new(path).map_err(|source| InitError::LogFile {
                path: path.clone(),
                source,
            })?;
            Some(
                JsonLayer::new(config.service_name.clone(), writer)
                    .with_filter(env_filter(&config.default_level)),
            )
        }
        None => None,
    };

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let tap_layer = config.tap.clone().map(|tap| {
        TapLayer::new(config.service_name.clone(), tap)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(tap_layer)
        .try_init()
        .map_err(|_| InitError::AlreadyInitialized)?;

    tracing::debug!(
        service = %config.service_name,
        log_path = ?config.log_path,
        tap = config.tap.is_some(),
        "observability initialized"
    );
    Ok(())
}

/// Filter from `RUST_LOG`, falling back to `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

//! Logging initialization for cmdrelay binaries.
//!
//! Thin wrapper over the observability crate: stderr output always, the
//! JSONL file and the log tap on request.

use crate::CoreResult;
use observability::{LogConfig, LogTap};
use std::path::PathBuf;

/// Optional logging outputs.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Service name written to every structured entry.
    pub service_name: String,
    /// Append JSONL entries to this file.
    pub log_file: Option<PathBuf>,
    /// Publish entries to an in-process tap (used by remote log forwarding).
    pub tap: Option<LogTap>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            service_name: "cmdrelay".to_string(),
            log_file: None,
            tap: None,
        }
    }
}

/// Initialize the logging system.
///
/// `level` is the default filter; `RUST_LOG` wins when set.
pub fn init_logging(level: &str, options: LoggingOptions) -> CoreResult<()> {
    observability::init_with_config(LogConfig {
        service_name: options.service_name,
        default_level: level.to_string(),
        log_path: options.log_file,
        also_stderr: true,
        tap: options.tap,
    })?;
    Ok(())
}

//! Core types, configuration, and utilities for cmdrelay.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_BIND_HOST, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_IO_TIMEOUT_MS,
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_FAILURES, DEFAULT_REQUEST_PORT, DEFAULT_RESPONSE_PORT,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, LoggingOptions};
pub use paths::Paths;

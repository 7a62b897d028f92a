//! Remote log streaming built on cmdrelay commands.
//!
//! Two sides of one session:
//!
//! - [`RemoteLoggingService`] runs next to the process whose logs are
//!   wanted. It answers `StartRemoteLogging` by forwarding every captured
//!   log entry to the callback address as a `LogRecord` command.
//! - [`LogCapture`] runs on the observing side. It starts a response engine
//!   that hands received records to a [`RecordSink`], asks the remote to
//!   start streaming, and shuts everything down when told to stop.

mod capture;
mod error;
mod forwarder;
mod sink;

pub use capture::{LogCapture, LogCaptureConfig, StopSignal};
pub use error::{RelayError, RelayResult};
pub use forwarder::{
    record_from_entry, FailureCounter, RemoteLoggingService, SessionStart, RELAY_LOG_TARGETS,
};
pub use sink::{format_log_record, RecordSink, SharedSink, StdoutSink};

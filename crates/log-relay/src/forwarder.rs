//! Producer side of remote logging.
//!
//! Each session owns a subscription to the process [`LogTap`] and a task
//! that turns entries into `LogRecord` commands for one callback address.
//! Sessions are keyed by callback, so at most one stream goes to each
//! receiver.

use command_protocol::{Command, CommandKind, ConnectionAddr, LogRecord, StartRemoteLogging};
use command_transport::{CommandEngine, Connection};
use observability::{LogEntry, LogTap};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tracing targets that must not feed the tap of a forwarding process.
pub const RELAY_LOG_TARGETS: [&str; 3] = ["command_transport", "command_protocol", "log_relay"];

/// Consecutive delivery failures of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCounter {
    ceiling: Option<u32>,
    consecutive: u32,
}

impl FailureCounter {
    /// `ceiling == None` tolerates any number of failures.
    pub fn new(ceiling: Option<u32>) -> Self {
        Self {
            ceiling,
            consecutive: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Count a failure. Returns true once the ceiling has been exceeded.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.ceiling.is_some_and(|max| self.consecutive > max)
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// What `start` did with the session for a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStart {
    Started,
    Reused,
    Replaced,
}

struct Session {
    id: u64,
    task: JoinHandle<()>,
}

type Sessions = Arc<Mutex<HashMap<ConnectionAddr, Session>>>;

/// Forwards captured log entries to remote callbacks.
#[derive(Clone)]
pub struct RemoteLoggingService {
    tap: LogTap,
    connection: Arc<Connection>,
    sessions: Sessions,
    next_id: Arc<AtomicU64>,
}

impl RemoteLoggingService {
    pub fn new(tap: LogTap, connection: Arc<Connection>) -> Self {
        Self {
            tap,
            connection,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Install the `StartRemoteLogging` and `StopRemoteLogging` handlers.
    pub async fn register(&self, engine: &CommandEngine) {
        let service = self.clone();
        engine
            .register_handler(CommandKind::StartRemoteLogging, move |command, ctx| {
                let service = service.clone();
                async move {
                    let request = match command {
                        Command::StartRemoteLogging(request) => request,
                        other => return Err(format!("unexpected {}", other.kind())),
                    };
                    if request.callback == ctx.address {
                        return Err(format!(
                            "callback {} is the engine receiving the request",
                            request.callback
                        ));
                    }
                    service.start(request);
                    Ok(())
                }
            })
            .await;

        let service = self.clone();
        engine
            .register_handler(CommandKind::StopRemoteLogging, move |command, _ctx| {
                let service = service.clone();
                async move {
                    let request = match command {
                        Command::StopRemoteLogging(request) => request,
                        other => return Err(format!("unexpected {}", other.kind())),
                    };
                    if !service.stop(&request.callback) {
                        debug!(callback = %request.callback, "No logging session to stop");
                    }
                    Ok(())
                }
            })
            .await;
    }

    /// Start streaming to `request.callback`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, request: StartRemoteLogging) -> SessionStart {
        let callback = request.callback.clone();
        let mut sessions = self.sessions.lock();

        let outcome = match sessions.get(&callback) {
            Some(existing) if !existing.task.is_finished() && !request.install_listener => {
                info!(callback = %callback, "Reusing remote logging session");
                return SessionStart::Reused;
            }
            Some(_) => SessionStart::Replaced,
            None => SessionStart::Started,
        };

        if let Some(old) = sessions.remove(&callback) {
            old.task.abort();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(forward(
            id,
            callback.clone(),
            FailureCounter::new(request.failure_ceiling()),
            self.tap.subscribe(),
            Arc::clone(&self.connection),
            Arc::clone(&self.sessions),
        ));
        sessions.insert(callback.clone(), Session { id, task });

        info!(
            callback = %callback,
            max_failures = request.max_failures,
            replaced = outcome == SessionStart::Replaced,
            "Remote logging session started"
        );
        outcome
    }

    /// End the session for `callback`. Returns false if there was none.
    pub fn stop(&self, callback: &ConnectionAddr) -> bool {
        match self.sessions.lock().remove(callback) {
            Some(session) => {
                session.task.abort();
                info!(callback = %callback, "Remote logging session stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, callback: &ConnectionAddr) -> bool {
        self.sessions
            .lock()
            .get(callback)
            .is_some_and(|session| !session.task.is_finished())
    }

    pub fn active_sessions(&self) -> Vec<ConnectionAddr> {
        self.sessions
            .lock()
            .iter()
            .filter(|(_, session)| !session.task.is_finished())
            .map(|(callback, _)| callback.clone())
            .collect()
    }

    /// End every session.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.sessions.lock().drain().collect();
        for (callback, session) in drained {
            session.task.abort();
            debug!(callback = %callback, "Remote logging session aborted");
        }
    }
}

async fn forward(
    id: u64,
    callback: ConnectionAddr,
    mut failures: FailureCounter,
    mut entries: broadcast::Receiver<LogEntry>,
    connection: Arc<Connection>,
    sessions: Sessions,
) {
    loop {
        let entry = match entries.recv().await {
            Ok(entry) => entry,
            Err(RecvError::Lagged(skipped)) => {
                warn!(callback = %callback, skipped, "Log forwarder fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let command = Command::LogRecord(record_from_entry(&entry));
        match connection.send_request(&callback, command).await {
            Ok(()) => failures.record_success(),
            Err(e) => {
                let exhausted = failures.record_failure();
                debug!(
                    callback = %callback,
                    consecutive = failures.consecutive(),
                    error = %e,
                    "Log record delivery failed"
                );
                if exhausted {
                    warn!(
                        callback = %callback,
                        consecutive = failures.consecutive(),
                        "Too many delivery failures, ending logging session"
                    );
                    break;
                }
            }
        }
    }

    let mut sessions = sessions.lock();
    if sessions.get(&callback).is_some_and(|session| session.id == id) {
        sessions.remove(&callback);
    }
}

/// Convert a captured entry into the wire record.
pub fn record_from_entry(entry: &LogEntry) -> LogRecord {
    LogRecord {
        timestamp: entry.timestamp.clone(),
        level: entry.level.clone(),
        service: entry.service.clone(),
        pid: entry.pid,
        target: entry.target.clone(),
        message: entry.message.clone(),
        fields: entry.string_fields(),
    }
}

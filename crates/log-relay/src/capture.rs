//! Observer side of remote logging: one capture session.
//!
//! 1. Start a response engine whose `LogRecord` handler feeds the sink.
//! 2. Ask the remote to stream to that engine (`install_listener = false`).
//! 3. If the remote cannot be reached or refuses, stop the local engine
//!    and report the error. There is no retry here.
//! 4. Otherwise wait until stopped, then tell the remote to stop streaming
//!    and shut the local engine down with a self-addressed `StopEngine`.

use crate::sink::SharedSink;
use crate::{RelayError, RelayResult};
use command_protocol::{
    Command, CommandKind, ConnectionAddr, EngineRole, StartRemoteLogging, StopRemoteLogging,
};
use command_transport::{
    is_wildcard_host, CommandEngine, Connection, EngineConfig, EngineHandle, SharedPortAllocator,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

const ENGINE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for one capture session.
#[derive(Debug, Clone)]
pub struct LogCaptureConfig {
    /// Control engine of the process whose logs are wanted.
    pub remote: ConnectionAddr,
    /// Interface the local response engine binds to.
    pub local_host: String,
    /// Host the remote should use as callback; defaults to `local_host`,
    /// which then must not be a wildcard address.
    pub advertised_host: Option<String>,
    /// Preferred port of the local response engine; 0 for ephemeral.
    pub preferred_port: u16,
    /// Consecutive delivery failures the remote tolerates; `<= 0` is unlimited.
    pub max_failures: i32,
}

impl LogCaptureConfig {
    pub fn new(remote: ConnectionAddr) -> Self {
        Self {
            remote,
            local_host: "127.0.0.1".to_string(),
            advertised_host: None,
            preferred_port: 0,
            max_failures: -1,
        }
    }
}

/// Cancellation flag for a capture session.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolve once `stop` has been called.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// A capture session whose remote has accepted the streaming request.
pub struct LogCapture {
    remote: ConnectionAddr,
    engine: EngineHandle,
    connection: Arc<Connection>,
}

impl LogCapture {
    /// Start the local engine and ask the remote to stream to it.
    pub async fn start(
        config: LogCaptureConfig,
        connection: Connection,
        allocator: SharedPortAllocator,
        sink: SharedSink,
    ) -> RelayResult<Self> {
        if config.advertised_host.is_none() && is_wildcard_host(&config.local_host) {
            return Err(RelayError::UnreachableCallback {
                host: config.local_host,
            });
        }

        let mut engine_config = EngineConfig::new(EngineRole::Response)
            .with_bind_host(config.local_host.clone())
            .with_preferred_port(config.preferred_port);
        if let Some(host) = &config.advertised_host {
            engine_config = engine_config.with_advertised_host(host.clone());
        }

        let engine = CommandEngine::with_connection(engine_config, connection, allocator);
        engine
            .register_handler(CommandKind::LogRecord, move |command, _ctx| {
                let sink = Arc::clone(&sink);
                async move {
                    match command {
                        Command::LogRecord(record) => {
                            sink.emit(&record);
                            Ok(())
                        }
                        other => Err(format!("unexpected {}", other.kind())),
                    }
                }
            })
            .await;
        let engine = engine.start()?;
        let connection = engine.connection();

        let request = Command::StartRemoteLogging(StartRemoteLogging {
            callback: engine.address().clone(),
            install_listener: false,
            max_failures: config.max_failures,
        });

        if let Err(source) = connection.send_request(&config.remote, request).await {
            warn!(remote = %config.remote, error = %source, "Remote refused log capture");
            stop_engine(&engine).await;
            return Err(RelayError::StartFailed {
                remote: config.remote,
                source,
            });
        }

        info!(
            remote = %config.remote,
            callback = %engine.address(),
            "Log capture started"
        );
        Ok(Self {
            remote: config.remote,
            engine,
            connection,
        })
    }

    /// Start a session and run it until `stop` fires.
    pub async fn run(
        config: LogCaptureConfig,
        connection: Connection,
        allocator: SharedPortAllocator,
        sink: SharedSink,
        stop: StopSignal,
    ) -> RelayResult<()> {
        Self::start(config, connection, allocator, sink)
            .await?
            .run_until(stop)
            .await
    }

    /// Callback address records are delivered to.
    pub fn address(&self) -> &ConnectionAddr {
        self.engine.address()
    }

    pub fn remote(&self) -> &ConnectionAddr {
        &self.remote
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Block until `stop` fires or the local engine ends, then shut down.
    pub async fn run_until(self, stop: StopSignal) -> RelayResult<()> {
        tokio::select! {
            _ = stop.wait() => {
                info!(remote = %self.remote, "Log capture cancelled");
            }
            state = self.engine.wait_stopped() => {
                warn!(remote = %self.remote, state = ?state, "Local engine ended");
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// Tell the remote to stop streaming, then stop the local engine.
    pub async fn shutdown(self) {
        let stop_streaming = Command::StopRemoteLogging(StopRemoteLogging {
            callback: self.engine.address().clone(),
        });
        if let Err(e) = self.connection.send_request(&self.remote, stop_streaming).await {
            warn!(remote = %self.remote, error = %e, "Failed to stop remote logging");
        }
        stop_engine(&self.engine).await;
        info!(remote = %self.remote, "Log capture finished");
    }
}

async fn stop_engine(engine: &EngineHandle) {
    if let Err(e) = engine.stop().await {
        warn!(error = %e, "Self-addressed stop failed");
    }
    if !engine.wait_stopped_timeout(ENGINE_STOP_TIMEOUT).await {
        warn!(addr = %engine.address(), "Local engine did not stop in time");
    }
}

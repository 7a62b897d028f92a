//! Command engine: a TCP listener that decodes incoming commands and
//! dispatches them to registered handlers.
//!
//! ## Lifecycle
//!
//! A [`CommandEngine`] is the created engine. [`CommandEngine::start`]
//! either fails (no port could be allocated or bound) or returns an
//! [`EngineHandle`] whose state moves `Bound -> Running -> Stopping -> Stopped`.
//!
//! The accept loop runs on its own task and serves one connection at a
//! time. It stops when a `StopEngine` request naming this engine's role
//! arrives (the engine acknowledges before leaving the loop), or when
//! [`EngineHandle::request_stop`] fires the in-process shutdown channel.
//! Either way the listener is closed and the port returned to the
//! allocator before the state reaches `Stopped`.

use crate::connection::Connection;
use crate::frame::{read_frame, write_ack};
use crate::port_allocator::{resolve_ip, reusable_socket, SharedPortAllocator};
use crate::{TransportError, TransportResult};
use command_protocol::{
    Command, CommandKind, ConnectionAddr, Direction, EngineRole, Envelope, SharedCodec,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Outcome of a handler: `Err` carries the message returned to the sender.
pub type HandlerResult = Result<(), String>;

/// Handler function type for commands.
pub type HandlerFn = Box<
    dyn Fn(Command, EngineContext) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>>
        + Send
        + Sync,
>;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
const LISTEN_BACKLOG: u32 = 128;

/// Listener settings for one engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub role: EngineRole,
    /// Interface the listener binds to.
    pub bind_host: String,
    /// Host peers should use to reach this engine; defaults to `bind_host`.
    /// Required when `bind_host` is a wildcard and peers must call back.
    pub advertised_host: Option<String>,
    /// First port to try; 0 for an ephemeral port.
    pub preferred_port: u16,
    /// How long a connected peer may take to send its command.
    pub read_timeout: Duration,
}

impl EngineConfig {
    pub fn new(role: EngineRole) -> Self {
        Self {
            role,
            bind_host: "127.0.0.1".to_string(),
            advertised_host: None,
            preferred_port: 0,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_advertised_host(mut self, host: impl Into<String>) -> Self {
        self.advertised_host = Some(host.into());
        self
    }

    pub fn with_preferred_port(mut self, port: u16) -> Self {
        self.preferred_port = port;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    fn advertised(&self, port: u16) -> ConnectionAddr {
        let host = self
            .advertised_host
            .clone()
            .unwrap_or_else(|| self.bind_host.clone());
        ConnectionAddr::new(host, port)
    }
}

/// True for addresses that bind every interface and cannot be dialed.
pub fn is_wildcard_host(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "::" | "[::]")
}

/// Address this process uses to reach its own listener.
fn loopback_for(bind_host: &str) -> String {
    match bind_host {
        "0.0.0.0" => "127.0.0.1".to_string(),
        "::" | "[::]" => "::1".to_string(),
        other => other.to_string(),
    }
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Bound,
    Running,
    Stopping,
    Stopped,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Stopped)
    }
}

/// What a handler knows about the engine that received its command.
#[derive(Clone)]
pub struct EngineContext {
    pub role: EngineRole,
    /// Address peers use to reach this engine.
    pub address: ConnectionAddr,
    /// ID of the envelope being handled.
    pub envelope_id: String,
    connection: Arc<Connection>,
}

impl EngineContext {
    /// Connection for sending responses and follow-up commands.
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }
}

/// A configured but not yet listening engine.
pub struct CommandEngine {
    config: EngineConfig,
    connection: Arc<Connection>,
    allocator: SharedPortAllocator,
    handlers: Arc<RwLock<HashMap<CommandKind, HandlerFn>>>,
    response_handler: Arc<RwLock<Option<HandlerFn>>>,
}

impl CommandEngine {
    /// Create an engine. An `Echo` handler is installed by default.
    pub fn new(config: EngineConfig, codec: SharedCodec, allocator: SharedPortAllocator) -> Self {
        Self::with_connection(config, Connection::new(codec), allocator)
    }

    /// Create an engine whose outgoing traffic uses `connection`.
    pub fn with_connection(
        config: EngineConfig,
        connection: Connection,
        allocator: SharedPortAllocator,
    ) -> Self {
        let mut handlers: HashMap<CommandKind, HandlerFn> = HashMap::new();
        handlers.insert(CommandKind::Echo, echo_handler());

        Self {
            config,
            connection: Arc::new(connection),
            allocator,
            handlers: Arc::new(RwLock::new(handlers)),
            response_handler: Arc::new(RwLock::new(None)),
        }
    }

    pub fn role(&self) -> EngineRole {
        self.config.role
    }

    /// Register a handler for requests of `kind`, replacing any existing one.
    ///
    /// `StopEngine` is always handled by the engine itself.
    pub async fn register_handler<F, Fut>(&self, kind: CommandKind, handler: F)
    where
        F: Fn(Command, EngineContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        if kind == CommandKind::StopEngine {
            warn!(role = %self.config.role, "Ignoring handler for stop_engine");
            return;
        }
        let boxed: HandlerFn = Box::new(move |command, ctx| Box::pin(handler(command, ctx)));
        self.handlers.write().await.insert(kind, boxed);
    }

    /// Register the handler for envelopes marked as responses.
    pub async fn register_response_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Command, EngineContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let boxed: HandlerFn = Box::new(move |command, ctx| Box::pin(handler(command, ctx)));
        *self.response_handler.write().await = Some(boxed);
    }

    /// Allocate a port, bind, and start the accept loop.
    ///
    /// Must be called from within a Tokio runtime. On failure the port, if
    /// one was leased, is released again. A `bind_host` that is not an IP
    /// literal is resolved synchronously.
    pub fn start(self) -> TransportResult<EngineHandle> {
        let role = self.config.role;
        let bind_host = self.config.bind_host.clone();

        let port = self
            .allocator
            .next(role.as_str(), self.config.preferred_port)
            .inspect_err(|e| error!(role = %role, error = %e, "Port allocation failed"))?;

        let bind_addr = ConnectionAddr::new(bind_host.clone(), port);
        let listener = match bind_listener(&bind_host, port) {
            Ok(listener) => listener,
            Err(source) => {
                self.allocator.release(port);
                error!(role = %role, addr = %bind_addr, error = %source, "Bind failed");
                return Err(TransportError::Bind {
                    addr: bind_addr,
                    source,
                });
            }
        };

        let address = self.config.advertised(port);
        let local = ConnectionAddr::new(loopback_for(&bind_host), port);
        let (state_tx, _) = watch::channel(EngineState::Bound);
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(role = %role, addr = %bind_addr, advertised = %address, "Command engine listening");

        let shared = Arc::new(EngineShared {
            role,
            address,
            local,
            port,
            read_timeout: self.config.read_timeout,
            allocator: self.allocator,
            connection: self.connection,
            handlers: self.handlers,
            response_handler: self.response_handler,
            state_tx,
            stop_requested: AtomicBool::new(false),
            shutdown_tx,
        });

        let shutdown_rx = shared.shutdown_tx.subscribe();
        shared.state_tx.send_replace(EngineState::Running);
        tokio::spawn(run_accept_loop(Arc::clone(&shared), listener, shutdown_rx));

        Ok(EngineHandle { shared })
    }
}

fn bind_listener(host: &str, port: u16) -> std::io::Result<TcpListener> {
    let addr = std::net::SocketAddr::new(resolve_ip(host)?, port);
    let socket = reusable_socket(&addr)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

struct EngineShared {
    role: EngineRole,
    address: ConnectionAddr,
    /// Dialable address of this engine from inside the process.
    local: ConnectionAddr,
    port: u16,
    read_timeout: Duration,
    allocator: SharedPortAllocator,
    connection: Arc<Connection>,
    handlers: Arc<RwLock<HashMap<CommandKind, HandlerFn>>>,
    response_handler: Arc<RwLock<Option<HandlerFn>>>,
    state_tx: watch::Sender<EngineState>,
    stop_requested: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl EngineShared {
    fn context(&self, envelope_id: String) -> EngineContext {
        EngineContext {
            role: self.role,
            address: self.address.clone(),
            envelope_id,
            connection: Arc::clone(&self.connection),
        }
    }
}

/// Handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl EngineHandle {
    pub fn role(&self) -> EngineRole {
        self.shared.role
    }

    /// Address peers use to reach this engine.
    pub fn address(&self) -> &ConnectionAddr {
        &self.shared.address
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    /// Connection the engine uses for outgoing traffic.
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.shared.connection)
    }

    /// Signal the accept loop to exit without going through the network.
    pub fn request_stop(&self) {
        if !self.shared.stop_requested.swap(true, Ordering::SeqCst) {
            debug!(role = %self.shared.role, "In-process stop requested");
        }
        let _ = self.shared.shutdown_tx.send(());
    }

    /// Stop the engine by sending it a `StopEngine` request for its own role.
    ///
    /// Falls back to [`request_stop`](Self::request_stop) when the
    /// self-addressed command cannot be delivered; the delivery error is
    /// still returned.
    pub async fn stop(&self) -> TransportResult<()> {
        if self.state().is_terminal() {
            return Ok(());
        }
        let result = self
            .shared
            .connection
            .send_request(&self.shared.local, Command::stop_engine(self.shared.role))
            .await;
        if let Err(e) = &result {
            warn!(role = %self.shared.role, error = %e, "Self-addressed stop failed, stopping in-process");
            self.request_stop();
        }
        result
    }

    /// Wait until the engine has stopped.
    pub async fn wait_stopped(&self) -> EngineState {
        let mut rx = self.shared.state_tx.subscribe();
        let state = match rx.wait_for(EngineState::is_terminal).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// Wait up to `limit` for the engine to stop. Returns true if it did.
    pub async fn wait_stopped_timeout(&self, limit: Duration) -> bool {
        timeout(limit, self.wait_stopped()).await.is_ok()
    }
}

async fn run_accept_loop(
    shared: Arc<EngineShared>,
    listener: TcpListener,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        if shared.stop_requested.load(Ordering::SeqCst) {
            break;
        }

        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        debug!(role = %shared.role, peer = %peer, "Accepted connection");
                        match handle_connection(&shared, stream).await {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(e) => {
                                warn!(role = %shared.role, peer = %peer, error = %e, "Connection error");
                            }
                        }
                    }
                    Err(e) => {
                        error!(role = %shared.role, error = %e, "Accept error");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!(role = %shared.role, "Command engine shutting down");
                break;
            }
        }
    }

    shared.state_tx.send_replace(EngineState::Stopping);
    drop(listener);
    shared.allocator.release(shared.port);
    shared.state_tx.send_replace(EngineState::Stopped);
    info!(role = %shared.role, port = shared.port, "Command engine stopped");
}

/// Serve one connection. Returns true when the engine should stop.
async fn handle_connection(shared: &EngineShared, stream: TcpStream) -> TransportResult<bool> {
    let (mut reader, mut writer) = stream.into_split();

    let frame = match timeout(shared.read_timeout, read_frame(&mut reader)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(TransportError::ConnectionClosed)) => {
            debug!(role = %shared.role, "Peer closed before sending a command");
            return Ok(false);
        }
        Ok(Err(e)) => {
            write_ack(&mut writer, Some(&e.to_string())).await?;
            return Ok(false);
        }
        Err(_) => {
            warn!(role = %shared.role, "Timed out waiting for a command");
            write_ack(&mut writer, Some("Timed out waiting for a command")).await?;
            return Ok(false);
        }
    };

    let envelope = match shared.connection.codec().decode(&frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(role = %shared.role, error = %e, "Failed to decode command");
            write_ack(&mut writer, Some(&format!("Failed to decode command: {e}"))).await?;
            return Ok(false);
        }
    };

    let (result, stop) = dispatch(shared, envelope).await;
    write_ack(&mut writer, result.err().as_deref()).await?;
    Ok(stop)
}

async fn dispatch(shared: &EngineShared, envelope: Envelope) -> (HandlerResult, bool) {
    let kind = envelope.kind();
    debug!(
        role = %shared.role,
        id = %envelope.id,
        kind = %kind,
        direction = envelope.direction.as_str(),
        "Received command"
    );

    if let (Direction::Request, Command::StopEngine(stop)) = (envelope.direction, &envelope.command)
    {
        if stop.target != shared.role {
            return (
                Err(format!(
                    "stop_engine targets the {} engine, this is the {} engine",
                    stop.target, shared.role
                )),
                false,
            );
        }
        shared.stop_requested.store(true, Ordering::SeqCst);
        info!(role = %shared.role, id = %envelope.id, "Stop requested by command");
        return (Ok(()), true);
    }

    let ctx = shared.context(envelope.id);
    let result = match envelope.direction {
        Direction::Request => {
            let handlers = shared.handlers.read().await;
            match handlers.get(&kind) {
                Some(handler) => handler(envelope.command, ctx).await,
                None => Err(format!("Unsupported command kind: {kind}")),
            }
        }
        Direction::Response => {
            let handler = shared.response_handler.read().await;
            match handler.as_ref() {
                Some(handler) => handler(envelope.command, ctx).await,
                None => {
                    info!(role = %shared.role, kind = %kind, "Received response with no response handler");
                    Ok(())
                }
            }
        }
    };

    if let Err(message) = &result {
        warn!(role = %shared.role, kind = %kind, error = %message, "Command failed");
    }
    (result, false)
}

/// Default `Echo` handler: reply with the same text, delivered to the
/// response channel when one is given.
fn echo_handler() -> HandlerFn {
    Box::new(|command, ctx| {
        Box::pin(async move {
            let Command::Echo(mut echo) = command else {
                return Err("echo handler received a different command".to_string());
            };
            info!(text = %echo.text, "Echo");
            echo.reply = Some(echo.text.clone());

            if echo.response_to.is_some() {
                // The sender's engine may be this one; respond off the accept loop.
                let connection = ctx.connection();
                tokio::spawn(async move {
                    if let Err(e) = connection.send_response(Command::Echo(echo)).await {
                        warn!(error = %e, "Failed to deliver echo response");
                    }
                });
            }
            Ok(())
        })
    })
}

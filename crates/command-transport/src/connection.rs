//! Client side of the transport.
//!
//! One command per TCP connection: connect, write the framed command, read
//! the acknowledgement line, close. No retries happen here; retry policy
//! belongs to the caller.

use crate::frame::{read_ack, write_frame};
use crate::{TransportError, TransportResult};
use command_protocol::{Command, CommandKind, ConnectionAddr, Envelope, SharedCodec};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Default time allowed to establish a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default time allowed for writing a command and reading its acknowledgement.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends commands to remote engines using a fixed codec.
#[derive(Clone)]
pub struct Connection {
    codec: SharedCodec,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl Connection {
    pub fn new(codec: SharedCodec) -> Self {
        Self {
            codec,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, io_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.io_timeout = io_timeout;
        self
    }

    pub fn codec(&self) -> &SharedCodec {
        &self.codec
    }

    /// Send `command` as a request to `target`.
    ///
    /// A command never names its own target as callback; `StopEngine`
    /// carries no callback and may be sent to the engine it stops.
    pub async fn send_request(
        &self,
        target: &ConnectionAddr,
        command: Command,
    ) -> TransportResult<()> {
        if command.kind() != CommandKind::StopEngine {
            if let Some(callback) = command.callback() {
                if callback == target {
                    return Err(TransportError::SelfAddressed {
                        kind: command.kind(),
                        addr: target.clone(),
                    });
                }
            }
        }
        self.send(target, Envelope::request(command)).await
    }

    /// Deliver `command` as a response to the callback address it carries.
    pub async fn send_response(&self, command: Command) -> TransportResult<()> {
        let target = command
            .response_channel()
            .cloned()
            .ok_or(TransportError::NoResponseChannel(command.kind()))?;
        self.send(&target, Envelope::response(command)).await
    }

    /// Send a prepared envelope to `target` and wait for the acknowledgement.
    pub async fn send(&self, target: &ConnectionAddr, envelope: Envelope) -> TransportResult<()> {
        let payload = self.codec.encode(&envelope)?;

        let stream = timeout(
            self.connect_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            addr: target.clone(),
            operation: "connecting to",
        })?
        .map_err(|source| TransportError::Connect {
            addr: target.clone(),
            source,
        })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let exchange = async {
            write_frame(&mut writer, &payload).await?;
            read_ack(&mut reader).await
        };
        let ack = timeout(self.io_timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout {
                addr: target.clone(),
                operation: "waiting for acknowledgement from",
            })??;

        match ack {
            None => {
                debug!(
                    id = %envelope.id,
                    kind = %envelope.kind(),
                    direction = envelope.direction.as_str(),
                    target = %target,
                    "Command delivered"
                );
                Ok(())
            }
            Some(message) => Err(TransportError::Rejected {
                addr: target.clone(),
                message,
            }),
        }
    }
}

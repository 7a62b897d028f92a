//! Transport error types.

use command_protocol::{CodecError, CommandKind, ConnectionAddr};
use thiserror::Error;

/// Transport error type.
#[derive(Error, Debug)]
pub enum TransportError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encode/decode error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Port allocator gave up
    #[error("No free port for role '{role}' after {probes} probes starting at {preferred}")]
    PortExhausted {
        role: String,
        preferred: u16,
        probes: u16,
    },

    /// Listener could not bind its allocated port
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: ConnectionAddr,
        #[source]
        source: std::io::Error,
    },

    /// Destination unreachable
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: ConnectionAddr,
        #[source]
        source: std::io::Error,
    },

    /// Operation did not finish in time
    #[error("Timed out while {operation} {addr}")]
    Timeout {
        addr: ConnectionAddr,
        operation: &'static str,
    },

    /// Remote engine answered with an error string
    #[error("{addr} rejected the command: {message}")]
    Rejected {
        addr: ConnectionAddr,
        message: String,
    },

    /// Remote closed without acknowledging
    #[error("Connection closed")]
    ConnectionClosed,

    /// Frame exceeds the size limit
    #[error("Frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    /// A response was requested for a command without a response channel
    #[error("Command '{0}' carries no response channel")]
    NoResponseChannel(CommandKind),

    /// A command asked a third party to deliver results back to that same party
    #[error("Command '{kind}' names its own target {addr} as callback")]
    SelfAddressed {
        kind: CommandKind,
        addr: ConnectionAddr,
    },
}

impl TransportError {
    /// True when the remote engine was reached and explicitly refused the command.
    pub fn is_remote_rejection(&self) -> bool {
        matches!(self, TransportError::Rejected { .. })
    }

    /// True for failures to reach or talk to the remote at all.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_)
                | TransportError::Connect { .. }
                | TransportError::Timeout { .. }
                | TransportError::ConnectionClosed
        )
    }
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;

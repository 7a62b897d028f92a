//! Log relay error types.

use command_protocol::ConnectionAddr;
use command_transport::TransportError;
use thiserror::Error;

/// Log relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The local engine would advertise an address the remote cannot dial
    #[error("Cannot advertise wildcard address {host} as callback; set an advertised host")]
    UnreachableCallback { host: String },

    /// The remote peer did not accept the capture request
    #[error("Failed to start remote logging on {remote}: {source}")]
    StartFailed {
        remote: ConnectionAddr,
        #[source]
        source: TransportError,
    },
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;

//! Command protocol for cmdrelay.
//!
//! Pure types only: the closed command set, the envelope that carries a
//! command over the wire, and the codecs that turn envelopes into bytes.
//! No I/O, no async.

mod addr;
pub mod codec;
mod command;
mod error;

pub use addr::{AddrParseError, ConnectionAddr, EngineRole};
pub use codec::{CodecKind, CommandCodec, JsonCodec, SharedCodec, TextCodec};
pub use command::{
    Command, CommandKind, Direction, Echo, Envelope, LogRecord, StartRemoteLogging, StopEngine,
    StopRemoteLogging, PROTOCOL_VERSION,
};
pub use error::{CodecError, CodecResult};

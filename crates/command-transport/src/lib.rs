//! TCP transport for cmdrelay commands.
//!
//! - [`PortAllocator`]: process-wide port leases for listeners
//! - [`Connection`]: one-shot command delivery with acknowledgement
//! - [`CommandEngine`]: listener that dispatches decoded commands to handlers

mod connection;
mod engine;
mod error;
pub mod frame;
mod port_allocator;

pub use connection::{Connection, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT};
pub use engine::{
    is_wildcard_host, CommandEngine, EngineConfig, EngineContext, EngineHandle, EngineState,
    HandlerFn, HandlerResult,
};
pub use error::{TransportError, TransportResult};
pub use port_allocator::{PortAllocator, SharedPortAllocator, DEFAULT_MAX_PROBES};

//! Subcommand implementations.

mod capture;
mod send;
mod serve;

pub use capture::capture;
pub use send::{echo, stop};
pub use serve::serve;

use command_transport::{Connection, PortAllocator, SharedPortAllocator};
use relay_config_and_utils::Config;

fn connection(config: &Config) -> Connection {
    Connection::new(config.codec.build()).with_timeouts(config.connect_timeout(), config.io_timeout())
}

fn allocator(config: &Config) -> SharedPortAllocator {
    PortAllocator::new(config.bind_host.clone()).shared()
}

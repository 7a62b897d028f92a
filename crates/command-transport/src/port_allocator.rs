//! Port allocation for command engines.
//!
//! One allocator is shared by every engine a process creates. It hands out
//! the preferred port when nothing else in the process holds it and the OS
//! lets us bind it, and otherwise probes upward. Leases are kept until the
//! engine releases them on shutdown.

use crate::{TransportError, TransportResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::net::TcpSocket;
use tracing::{debug, warn};

/// Default number of ports tried before giving up.
pub const DEFAULT_MAX_PROBES: u16 = 100;

/// Allocator shared between engines.
pub type SharedPortAllocator = Arc<PortAllocator>;

/// Process-local registry of ports held by listeners, keyed by port.
#[derive(Debug)]
pub struct PortAllocator {
    bind_host: String,
    max_probes: u16,
    leases: Mutex<HashMap<u16, String>>,
}

impl PortAllocator {
    /// Create an allocator that probes ports on `bind_host`.
    pub fn new(bind_host: impl Into<String>) -> Self {
        Self {
            bind_host: bind_host.into(),
            max_probes: DEFAULT_MAX_PROBES,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Limit how many candidate ports `next` tries.
    pub fn with_max_probes(mut self, max_probes: u16) -> Self {
        self.max_probes = max_probes.max(1);
        self
    }

    pub fn shared(self) -> SharedPortAllocator {
        Arc::new(self)
    }

    pub fn bind_host(&self) -> &str {
        &self.bind_host
    }

    /// Lease a port for `role`, starting at `preferred`.
    ///
    /// `preferred == 0` asks the OS for an ephemeral port. A port leased to
    /// any role, including `role` itself, is skipped: it is already bound by
    /// another engine in this process. The lease is recorded before the lock
    /// is released, so concurrent callers never receive the same port.
    ///
    /// The bind host is resolved before the lock is taken; IP literals never
    /// touch the resolver.
    pub fn next(&self, role: &str, preferred: u16) -> TransportResult<u16> {
        let ip = resolve_ip(&self.bind_host)?;
        let mut leases = self.leases.lock();

        if preferred == 0 {
            for _ in 0..self.max_probes {
                let port = probe(ip, 0)?;
                if !leases.contains_key(&port) {
                    leases.insert(port, role.to_string());
                    debug!(role, port, "Leased ephemeral port");
                    return Ok(port);
                }
            }
            return Err(self.exhausted(role, preferred));
        }

        let mut candidate = preferred;
        for _ in 0..self.max_probes {
            match leases.get(&candidate) {
                Some(holder) => {
                    debug!(role, port = candidate, holder = %holder, "Port held in-process, probing next");
                }
                None => match probe(ip, candidate) {
                    Ok(_) => {
                        leases.insert(candidate, role.to_string());
                        if candidate != preferred {
                            debug!(role, preferred, port = candidate, "Preferred port taken, leased alternative");
                        } else {
                            debug!(role, port = candidate, "Leased preferred port");
                        }
                        return Ok(candidate);
                    }
                    Err(e) => {
                        debug!(role, port = candidate, error = %e, "Port not bindable, probing next");
                    }
                },
            }
            candidate = match candidate.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }

        Err(self.exhausted(role, preferred))
    }

    /// Return a port to the pool.
    pub fn release(&self, port: u16) {
        match self.leases.lock().remove(&port) {
            Some(role) => debug!(role = %role, port, "Released port"),
            None => warn!(port, "Release of a port that was not leased"),
        }
    }

    /// Role currently holding `port`, if any.
    pub fn holder(&self, port: u16) -> Option<String> {
        self.leases.lock().get(&port).cloned()
    }

    /// Snapshot of all leases, sorted by port.
    pub fn leases(&self) -> Vec<(u16, String)> {
        let mut leases: Vec<_> = self
            .leases
            .lock()
            .iter()
            .map(|(port, role)| (*port, role.clone()))
            .collect();
        leases.sort();
        leases
    }

    fn exhausted(&self, role: &str, preferred: u16) -> TransportError {
        TransportError::PortExhausted {
            role: role.to_string(),
            preferred,
            probes: self.max_probes,
        }
    }
}

/// Resolve a bind host to an IP address.
///
/// IP literals (bracketed IPv6 included) are parsed directly. Anything else
/// goes through the system resolver, which blocks.
pub(crate) fn resolve_ip(host: &str) -> io::Result<IpAddr> {
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(ip);
    }
    (host, 0)
        .to_socket_addrs()?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve {host}"),
            )
        })
}

/// Build an unbound socket for `addr` with `SO_REUSEADDR` set.
pub(crate) fn reusable_socket(addr: &SocketAddr) -> io::Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    Ok(socket)
}

/// Bind (without listening) to check the port is usable; returns the bound port.
fn probe(ip: IpAddr, port: u16) -> io::Result<u16> {
    let addr = SocketAddr::new(ip, port);
    let socket = reusable_socket(&addr)?;
    socket.bind(addr)?;
    Ok(socket.local_addr()?.port())
}

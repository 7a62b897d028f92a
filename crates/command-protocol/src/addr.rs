//! Connection descriptors and engine roles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Host and port of a command-accepting listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionAddr {
    pub host: String,
    pub port: u16,
}

impl ConnectionAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Loopback address on the given port.
    pub fn localhost(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }
}

impl fmt::Display for ConnectionAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error returned when a `host:port` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address '{input}': {reason}")]
pub struct AddrParseError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for ConnectionAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| AddrParseError {
            input: s.to_string(),
            reason,
        };
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(|| err("missing port"))?;
        if host.is_empty() {
            return Err(err("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| err("port is not a number"))?;
        Ok(Self::new(host, port))
    }
}

/// Which listener of a process a command is aimed at.
///
/// A process can run a request engine (control commands) and a response
/// engine (deliveries for commands it sent out) at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineRole {
    Request,
    Response,
}

impl EngineRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineRole::Request => "request",
            EngineRole::Response => "response",
        }
    }
}

impl fmt::Display for EngineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" => Ok(EngineRole::Request),
            "response" => Ok(EngineRole::Response),
            other => Err(format!("unknown engine role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port() {
        let addr: ConnectionAddr = "10.0.0.5:12345".parse().unwrap();
        assert_eq!(addr, ConnectionAddr::new("10.0.0.5", 12345));
        assert_eq!(addr.to_string(), "10.0.0.5:12345");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("localhost".parse::<ConnectionAddr>().is_err());
        assert!(":80".parse::<ConnectionAddr>().is_err());
        assert!("host:99999".parse::<ConnectionAddr>().is_err());
        assert!("host:http".parse::<ConnectionAddr>().is_err());
    }

    #[test]
    fn equality_is_by_value() {
        assert_eq!(ConnectionAddr::localhost(80), ConnectionAddr::new("127.0.0.1", 80));
        assert_ne!(ConnectionAddr::localhost(80), ConnectionAddr::localhost(81));
    }

    #[test]
    fn engine_role_round_trips_through_str() {
        for role in [EngineRole::Request, EngineRole::Response] {
            assert_eq!(role.as_str().parse::<EngineRole>().unwrap(), role);
        }
        assert_eq!("RESPONSE".parse::<EngineRole>().unwrap(), EngineRole::Response);
        assert!("both".parse::<EngineRole>().is_err());
    }
}

//! Command model.
//!
//! The set of commands is closed: every variant of [`Command`] has a
//! [`CommandKind`] tag that the codecs switch on when decoding.

use crate::addr::{ConnectionAddr, EngineRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Current wire protocol version. Bump when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Tag identifying a command variant on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Echo,
    StartRemoteLogging,
    StopRemoteLogging,
    LogRecord,
    StopEngine,
}

impl CommandKind {
    pub const ALL: [CommandKind; 5] = [
        CommandKind::Echo,
        CommandKind::StartRemoteLogging,
        CommandKind::StopRemoteLogging,
        CommandKind::LogRecord,
        CommandKind::StopEngine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Echo => "echo",
            CommandKind::StartRemoteLogging => "start_remote_logging",
            CommandKind::StopRemoteLogging => "stop_remote_logging",
            CommandKind::LogRecord => "log_record",
            CommandKind::StopEngine => "stop_engine",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Diagnostic command with response.
///
/// The receiving engine copies `text` into `reply` and, when `response_to`
/// is set, delivers the result there as a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Echo {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<ConnectionAddr>,
}

/// Asks a peer to stream its log records to `callback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartRemoteLogging {
    /// Where log records should be delivered.
    pub callback: ConnectionAddr,
    /// Install a fresh capture subscription even if a session for
    /// `callback` already exists.
    pub install_listener: bool,
    /// Consecutive delivery failures tolerated; `<= 0` means unlimited.
    pub max_failures: i32,
}

impl StartRemoteLogging {
    /// Failure ceiling, `None` when unlimited.
    pub fn failure_ceiling(&self) -> Option<u32> {
        u32::try_from(self.max_failures).ok().filter(|max| *max > 0)
    }
}

/// Ends the log streaming session aimed at `callback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopRemoteLogging {
    pub callback: ConnectionAddr,
}

/// A single log record pushed to a callback address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogRecord {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub level: String,
    pub service: String,
    pub pid: u32,
    pub target: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

/// Stops the engine with the given role on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopEngine {
    pub target: EngineRole,
}

/// Closed set of commands understood by every codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Echo(Echo),
    StartRemoteLogging(StartRemoteLogging),
    StopRemoteLogging(StopRemoteLogging),
    LogRecord(LogRecord),
    StopEngine(StopEngine),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Echo(_) => CommandKind::Echo,
            Command::StartRemoteLogging(_) => CommandKind::StartRemoteLogging,
            Command::StopRemoteLogging(_) => CommandKind::StopRemoteLogging,
            Command::LogRecord(_) => CommandKind::LogRecord,
            Command::StopEngine(_) => CommandKind::StopEngine,
        }
    }

    /// The callback address embedded in the command, if any.
    pub fn callback(&self) -> Option<&ConnectionAddr> {
        match self {
            Command::Echo(echo) => echo.response_to.as_ref(),
            Command::StartRemoteLogging(start) => Some(&start.callback),
            Command::StopRemoteLogging(stop) => Some(&stop.callback),
            Command::LogRecord(_) | Command::StopEngine(_) => None,
        }
    }

    /// Where the result of this command is delivered, for commands with response.
    pub fn response_channel(&self) -> Option<&ConnectionAddr> {
        match self {
            Command::Echo(echo) => echo.response_to.as_ref(),
            _ => None,
        }
    }

    pub fn echo(text: impl Into<String>) -> Self {
        Command::Echo(Echo {
            text: text.into(),
            reply: None,
            response_to: None,
        })
    }

    pub fn stop_engine(target: EngineRole) -> Self {
        Command::StopEngine(StopEngine { target })
    }
}

/// Whether an envelope carries a request or the response to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(Direction::Request),
            "response" => Ok(Direction::Response),
            other => Err(other.to_string()),
        }
    }
}

/// A command as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope ID for correlation in logs.
    pub id: String,
    pub version: u32,
    pub direction: Direction,
    pub command: Command,
}

impl Envelope {
    /// Wrap a command as a request with an auto-generated ID.
    pub fn request(command: Command) -> Self {
        Self::new(Direction::Request, command)
    }

    /// Wrap a command as a response with an auto-generated ID.
    pub fn response(command: Command) -> Self {
        Self::new(Direction::Response, command)
    }

    fn new(direction: Direction, command: Command) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version: PROTOCOL_VERSION,
            direction,
            command,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_unique_and_parse_back() {
        for kind in CommandKind::ALL {
            assert_eq!(kind.as_str().parse::<CommandKind>().unwrap(), kind);
        }
        assert_eq!("bogus".parse::<CommandKind>(), Err("bogus".to_string()));
    }

    #[test]
    fn callback_exposes_embedded_address() {
        let addr = ConnectionAddr::localhost(4000);
        let start = Command::StartRemoteLogging(StartRemoteLogging {
            callback: addr.clone(),
            install_listener: false,
            max_failures: -1,
        });
        assert_eq!(start.callback(), Some(&addr));
        assert_eq!(start.response_channel(), None);

        assert_eq!(Command::echo("hi").callback(), None);
        assert_eq!(Command::stop_engine(EngineRole::Response).callback(), None);
    }

    #[test]
    fn failure_ceiling_treats_non_positive_as_unlimited() {
        let mut start = StartRemoteLogging {
            callback: ConnectionAddr::localhost(1),
            install_listener: false,
            max_failures: -1,
        };
        assert_eq!(start.failure_ceiling(), None);
        start.max_failures = 0;
        assert_eq!(start.failure_ceiling(), None);
        start.max_failures = 3;
        assert_eq!(start.failure_ceiling(), Some(3));
    }

    #[test]
    fn envelope_ids_are_unique() {
        let a = Envelope::request(Command::echo("a"));
        let b = Envelope::request(Command::echo("a"));
        assert_ne!(a.id, b.id);
        assert_eq!(a.version, PROTOCOL_VERSION);
        assert_eq!(a.direction, Direction::Request);
        assert_eq!(Envelope::response(Command::echo("a")).direction, Direction::Response);
    }
}

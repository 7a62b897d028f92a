//! Pluggable wire formats.
//!
//! A codec turns an [`Envelope`] into bytes and back. Client and server must
//! use the same codec for an exchange; a mismatch surfaces as a decode error
//! on the receiving engine, which is reported back to the sender.

mod json;
mod text;

pub use json::JsonCodec;
pub use text::TextCodec;

use crate::{CodecResult, Envelope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Encodes and decodes command envelopes.
pub trait CommandCodec: Send + Sync + 'static {
    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Serialize an envelope to bytes.
    fn encode(&self, envelope: &Envelope) -> CodecResult<Vec<u8>>;

    /// Reconstruct an envelope, failing on unknown kinds or invalid payloads.
    fn decode(&self, bytes: &[u8]) -> CodecResult<Envelope>;
}

/// Codec shared between connections and engines.
pub type SharedCodec = Arc<dyn CommandCodec>;

/// Codec selection for configuration files and CLI flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Json,
    Text,
}

impl CodecKind {
    pub fn build(self) -> SharedCodec {
        match self {
            CodecKind::Json => Arc::new(JsonCodec),
            CodecKind::Text => Arc::new(TextCodec),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodecKind::Json => "json",
            CodecKind::Text => "text",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(CodecKind::Json),
            "text" => Ok(CodecKind::Text),
            other => Err(format!("unknown codec: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Command, ConnectionAddr, Echo, EngineRole, LogRecord, StartRemoteLogging,
        StopRemoteLogging,
    };
    use std::collections::BTreeMap;

    fn sample_commands() -> Vec<Command> {
        let mut fields = BTreeMap::new();
        fields.insert("peer".to_string(), "127.0.0.1:9000".to_string());
        fields.insert("note".to_string(), "line one\nline two = still".to_string());

        vec![
            Command::echo("hello"),
            Command::Echo(Echo {
                text: "ping\\pong".to_string(),
                reply: Some("ping\\pong".to_string()),
                response_to: Some(ConnectionAddr::localhost(4100)),
            }),
            Command::StartRemoteLogging(StartRemoteLogging {
                callback: ConnectionAddr::new("relay.lan", 12346),
                install_listener: false,
                max_failures: -1,
            }),
            Command::StopRemoteLogging(StopRemoteLogging {
                callback: ConnectionAddr::new("relay.lan", 12346),
            }),
            Command::LogRecord(LogRecord {
                timestamp: "2026-01-15T10:30:00.000000Z".to_string(),
                level: "INFO".to_string(),
                service: "cmdrelay".to_string(),
                pid: 4242,
                target: "relay_bin::serve".to_string(),
                message: "heartbeat".to_string(),
                fields,
            }),
            Command::stop_engine(EngineRole::Request),
            Command::stop_engine(EngineRole::Response),
        ]
    }

    #[test]
    fn every_command_survives_both_codecs() {
        for kind in [CodecKind::Json, CodecKind::Text] {
            let codec = kind.build();
            for command in sample_commands() {
                let envelope = Envelope::request(command);
                let bytes = codec.encode(&envelope).unwrap();
                let decoded = codec.decode(&bytes).unwrap();
                assert_eq!(decoded, envelope, "codec {} changed the envelope", codec.name());
            }
        }
    }

    #[test]
    fn response_direction_is_preserved() {
        for kind in [CodecKind::Json, CodecKind::Text] {
            let codec = kind.build();
            let envelope = Envelope::response(Command::echo("done"));
            let decoded = codec.decode(&codec.encode(&envelope).unwrap()).unwrap();
            assert_eq!(decoded.direction, crate::Direction::Response);
        }
    }

    #[test]
    fn mismatched_codecs_fail_to_decode() {
        let envelope = Envelope::request(Command::echo("hello"));
        let json_bytes = JsonCodec.encode(&envelope).unwrap();
        let text_bytes = TextCodec.encode(&envelope).unwrap();

        assert!(TextCodec.decode(&json_bytes).is_err());
        assert!(JsonCodec.decode(&text_bytes).is_err());
    }

    #[test]
    fn codec_kind_parses() {
        assert_eq!("JSON".parse::<CodecKind>().unwrap(), CodecKind::Json);
        assert_eq!("text".parse::<CodecKind>().unwrap(), CodecKind::Text);
        assert!("xml".parse::<CodecKind>().is_err());
        assert_eq!(CodecKind::default(), CodecKind::Json);
        assert_eq!(CodecKind::Text.build().name(), "text");
    }
}

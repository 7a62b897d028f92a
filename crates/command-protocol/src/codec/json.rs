//! JSON wire format.
//!
//! `{"id":"..","version":1,"direction":"request","kind":"echo","payload":{..}}`

use super::CommandCodec;
use crate::{
    CodecError, CodecResult, Command, CommandKind, Direction, Envelope, PROTOCOL_VERSION,
};
use serde::Serialize;
use serde_json::{Map, Value};

const ENVELOPE_KEYS: [&str; 5] = ["id", "version", "direction", "kind", "payload"];

/// Default codec: one JSON object per command.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[derive(Serialize)]
struct WireEnvelope<'a> {
    id: &'a str,
    version: u32,
    direction: Direction,
    kind: CommandKind,
    payload: Value,
}

impl CommandCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, envelope: &Envelope) -> CodecResult<Vec<u8>> {
        let payload = match &envelope.command {
            Command::Echo(cmd) => serde_json::to_value(cmd)?,
            Command::StartRemoteLogging(cmd) => serde_json::to_value(cmd)?,
            Command::StopRemoteLogging(cmd) => serde_json::to_value(cmd)?,
            Command::LogRecord(cmd) => serde_json::to_value(cmd)?,
            Command::StopEngine(cmd) => serde_json::to_value(cmd)?,
        };
        let wire = WireEnvelope {
            id: &envelope.id,
            version: envelope.version,
            direction: envelope.direction,
            kind: envelope.kind(),
            payload,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Envelope> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut obj) = value else {
            return Err(CodecError::Malformed("expected a JSON object".to_string()));
        };

        if let Some(extra) = obj.keys().find(|k| !ENVELOPE_KEYS.contains(&k.as_str())) {
            return Err(CodecError::Malformed(format!("unexpected key '{extra}'")));
        }

        // The kind decides how the payload is read, so it is validated first.
        let kind = required_str(&obj, "kind")?
            .parse::<CommandKind>()
            .map_err(CodecError::UnknownKind)?;

        let version = obj
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| missing("version"))?;
        let version = u32::try_from(version).map_err(|_| CodecError::InvalidField {
            field: "version".to_string(),
            reason: format!("{version} is out of range"),
        })?;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let id = required_str(&obj, "id")?.to_string();
        let direction = required_str(&obj, "direction")?
            .parse::<Direction>()
            .map_err(|other| CodecError::InvalidField {
                field: "direction".to_string(),
                reason: format!("unknown direction '{other}'"),
            })?;

        let payload = obj.remove("payload").ok_or_else(|| missing("payload"))?;
        let command = match kind {
            CommandKind::Echo => Command::Echo(serde_json::from_value(payload)?),
            CommandKind::StartRemoteLogging => {
                Command::StartRemoteLogging(serde_json::from_value(payload)?)
            }
            CommandKind::StopRemoteLogging => {
                Command::StopRemoteLogging(serde_json::from_value(payload)?)
            }
            CommandKind::LogRecord => Command::LogRecord(serde_json::from_value(payload)?),
            CommandKind::StopEngine => Command::StopEngine(serde_json::from_value(payload)?),
        };

        Ok(Envelope {
            id,
            version,
            direction,
            command,
        })
    }
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &str) -> CodecResult<&'a str> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(field))
}

fn missing(field: &str) -> CodecError {
    CodecError::MissingField {
        field: field.to_string(),
    }
}

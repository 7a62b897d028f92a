//! Line-oriented text wire format.
//!
//! ```text
//! cmdrelay/1
//! id=6f1c...
//! direction=request
//! kind=start_remote_logging
//! callback=10.0.0.2:12346
//! install_listener=false
//! max_failures=-1
//! ```
//!
//! Values escape `\`, newline and carriage return. Log record fields are
//! written as `field.<name>=<value>`.

use super::CommandCodec;
use crate::{
    CodecError, CodecResult, Command, CommandKind, ConnectionAddr, Direction, Echo, EngineRole,
    Envelope, LogRecord, StartRemoteLogging, StopEngine, StopRemoteLogging, PROTOCOL_VERSION,
};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

const HEADER_PREFIX: &str = "cmdrelay/";
const FIELD_PREFIX: &str = "field.";

/// Human-readable alternative to [`super::JsonCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl CommandCodec for TextCodec {
    fn name(&self) -> &'static str {
        "text"
    }

    fn encode(&self, envelope: &Envelope) -> CodecResult<Vec<u8>> {
        let mut out = LineWriter::new(envelope.version);
        out.put("id", &envelope.id)?;
        out.put("direction", envelope.direction.as_str())?;
        out.put("kind", envelope.kind().as_str())?;

        match &envelope.command {
            Command::Echo(echo) => {
                out.put("text", &echo.text)?;
                if let Some(reply) = &echo.reply {
                    out.put("reply", reply)?;
                }
                if let Some(addr) = &echo.response_to {
                    out.put("response_to", addr)?;
                }
            }
            Command::StartRemoteLogging(start) => {
                out.put("callback", &start.callback)?;
                out.put("install_listener", start.install_listener)?;
                out.put("max_failures", start.max_failures)?;
            }
            Command::StopRemoteLogging(stop) => {
                out.put("callback", &stop.callback)?;
            }
            Command::LogRecord(record) => {
                out.put("timestamp", &record.timestamp)?;
                out.put("level", &record.level)?;
                out.put("service", &record.service)?;
                out.put("pid", record.pid)?;
                out.put("target", &record.target)?;
                out.put("message", &record.message)?;
                for (name, value) in &record.fields {
                    out.put(&format!("{FIELD_PREFIX}{name}"), value)?;
                }
            }
            Command::StopEngine(stop) => {
                out.put("target", stop.target)?;
            }
        }

        Ok(out.finish())
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Envelope> {
        let text = std::str::from_utf8(bytes)?;
        let mut lines = text.lines();

        let header = lines
            .next()
            .ok_or_else(|| CodecError::Malformed("empty frame".to_string()))?;
        let version = header
            .strip_prefix(HEADER_PREFIX)
            .ok_or_else(|| CodecError::Malformed(format!("bad header '{header}'")))?;
        let version = parse_value::<u32>("version", version)?;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let mut fields = Fields::default();
        for line in lines.filter(|l| !l.is_empty()) {
            let (key, raw) = line
                .split_once('=')
                .ok_or_else(|| CodecError::Malformed(format!("expected key=value, got '{line}'")))?;
            fields.insert(key, unescape(raw)?)?;
        }

        // The kind decides which fields are read, so it is validated first.
        let kind = fields
            .take("kind")?
            .parse::<CommandKind>()
            .map_err(CodecError::UnknownKind)?;
        let id = fields.take("id")?;
        let direction = fields.take_parsed::<Direction>("direction")?;

        let command = match kind {
            CommandKind::Echo => Command::Echo(Echo {
                text: fields.take("text")?,
                reply: fields.take_opt("reply"),
                response_to: fields
                    .take_opt("response_to")
                    .map(|raw| parse_value::<ConnectionAddr>("response_to", &raw))
                    .transpose()?,
            }),
            CommandKind::StartRemoteLogging => Command::StartRemoteLogging(StartRemoteLogging {
                callback: fields.take_parsed("callback")?,
                install_listener: fields.take_parsed("install_listener")?,
                max_failures: fields.take_parsed("max_failures")?,
            }),
            CommandKind::StopRemoteLogging => Command::StopRemoteLogging(StopRemoteLogging {
                callback: fields.take_parsed("callback")?,
            }),
            CommandKind::LogRecord => Command::LogRecord(LogRecord {
                timestamp: fields.take("timestamp")?,
                level: fields.take("level")?,
                service: fields.take("service")?,
                pid: fields.take_parsed("pid")?,
                target: fields.take("target")?,
                message: fields.take("message")?,
                fields: fields.take_prefixed(FIELD_PREFIX),
            }),
            CommandKind::StopEngine => Command::StopEngine(StopEngine {
                target: fields.take_parsed::<EngineRole>("target")?,
            }),
        };
        fields.finish()?;

        Ok(Envelope {
            id,
            version,
            direction,
            command,
        })
    }
}

struct LineWriter {
    buf: String,
}

impl LineWriter {
    fn new(version: u32) -> Self {
        Self {
            buf: format!("{HEADER_PREFIX}{version}\n"),
        }
    }

    fn put(&mut self, key: &str, value: impl Display) -> CodecResult<()> {
        if key.is_empty() || key.contains(['=', '\n', '\r']) {
            return Err(CodecError::InvalidField {
                field: key.to_string(),
                reason: "key cannot be written as text".to_string(),
            });
        }
        self.buf.push_str(key);
        self.buf.push('=');
        escape_into(&value.to_string(), &mut self.buf);
        self.buf.push('\n');
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.buf.into_bytes()
    }
}

#[derive(Default)]
struct Fields {
    values: BTreeMap<String, String>,
}

impl Fields {
    fn insert(&mut self, key: &str, value: String) -> CodecResult<()> {
        if self.values.insert(key.to_string(), value).is_some() {
            return Err(CodecError::Malformed(format!("duplicate key '{key}'")));
        }
        Ok(())
    }

    fn take(&mut self, key: &str) -> CodecResult<String> {
        self.values.remove(key).ok_or_else(|| CodecError::MissingField {
            field: key.to_string(),
        })
    }

    fn take_opt(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    fn take_parsed<T>(&mut self, key: &str) -> CodecResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.take(key)?;
        parse_value(key, &raw)
    }

    fn take_prefixed(&mut self, prefix: &str) -> BTreeMap<String, String> {
        let keys: Vec<String> = self
            .values
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| {
                let value = self.values.remove(&key)?;
                Some((key[prefix.len()..].to_string(), value))
            })
            .collect()
    }

    fn finish(self) -> CodecResult<()> {
        match self.values.keys().next() {
            Some(extra) => Err(CodecError::Malformed(format!("unexpected key '{extra}'"))),
            None => Ok(()),
        }
    }
}

fn parse_value<T>(field: &str, raw: &str) -> CodecResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>().map_err(|e| CodecError::InvalidField {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

fn escape_into(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> CodecResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            other => {
                return Err(CodecError::Malformed(format!(
                    "invalid escape sequence '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

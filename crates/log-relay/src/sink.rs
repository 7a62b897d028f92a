//! Destinations for received log records.

use command_protocol::LogRecord;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives every log record delivered to a capture session.
pub trait RecordSink: Send + Sync + 'static {
    fn emit(&self, record: &LogRecord);
}

pub type SharedSink = Arc<dyn RecordSink>;

/// Prints each record as one line on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl RecordSink for StdoutSink {
    fn emit(&self, record: &LogRecord) {
        println!("{}", format_log_record(record));
    }
}

impl RecordSink for mpsc::UnboundedSender<LogRecord> {
    fn emit(&self, record: &LogRecord) {
        let _ = self.send(record.clone());
    }
}

/// `[<timestamp>] <LEVEL> <service>(<pid>) <target>: <message> k=v ...`
pub fn format_log_record(record: &LogRecord) -> String {
    let mut line = format!(
        "[{}] {} {}({}) {}: {}",
        record.timestamp, record.level, record.service, record.pid, record.target, record.message
    );
    for (key, value) in &record.fields {
        let _ = write!(line, " {key}={value}");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(fields: BTreeMap<String, String>) -> LogRecord {
        LogRecord {
            timestamp: "2026-03-01T12:00:00.000000Z".to_string(),
            level: "WARN".to_string(),
            service: "worker".to_string(),
            pid: 4242,
            target: "worker::jobs".to_string(),
            message: "job retried".to_string(),
            fields,
        }
    }

    #[test]
    fn formats_without_fields() {
        assert_eq!(
            format_log_record(&record(BTreeMap::new())),
            "[2026-03-01T12:00:00.000000Z] WARN worker(4242) worker::jobs: job retried"
        );
    }

    #[test]
    fn formats_fields_in_key_order() {
        let fields = BTreeMap::from([
            ("job".to_string(), "sync".to_string()),
            ("attempt".to_string(), "2".to_string()),
        ]);
        assert!(format_log_record(&record(fields)).ends_with("job retried attempt=2 job=sync"));
    }

    #[test]
    fn channel_sink_forwards_records() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(&record(BTreeMap::new()));
        assert_eq!(rx.try_recv().unwrap().message, "job retried");
    }
}

//! In-process log tap.
//!
//! [`TapLayer`] turns every accepted event into a [`LogEntry`] and
//! publishes it on a broadcast channel. Consumers subscribe through
//! [`LogTap::subscribe`]; slow consumers lose the oldest entries rather
//! than blocking the code that logs.

use crate::json_layer::LogEntry;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Default number of entries buffered per subscriber.
pub const DEFAULT_TAP_CAPACITY: usize = 1024;

/// Broadcast point for log entries.
#[derive(Debug, Clone)]
pub struct LogTap {
    sender: broadcast::Sender<LogEntry>,
    excluded_targets: Arc<Vec<String>>,
}

impl LogTap {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            excluded_targets: Arc::new(Vec::new()),
        }
    }

    /// Drop events whose target starts with any of `prefixes`.
    ///
    /// Consumers that forward entries over the network exclude their own
    /// crates so that forwarding does not log about itself forever.
    pub fn excluding<I, P>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let mut excluded = self.excluded_targets.as_ref().clone();
        excluded.extend(prefixes.into_iter().map(Into::into));
        self.excluded_targets = Arc::new(excluded);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Whether events from `target` reach subscribers.
    pub fn accepts(&self, target: &str) -> bool {
        !self
            .excluded_targets
            .iter()
            .any(|prefix| target.starts_with(prefix.as_str()))
    }

    /// Publish an entry. Entries are dropped when nobody is subscribed.
    pub fn publish(&self, entry: LogEntry) {
        if self.accepts(&entry.target) {
            let _ = self.sender.send(entry);
        }
    }
}

impl Default for LogTap {
    fn default() -> Self {
        Self::new(DEFAULT_TAP_CAPACITY)
    }
}

/// Layer that feeds a [`LogTap`].
pub struct TapLayer {
    service_name: String,
    pid: u32,
    tap: LogTap,
}

impl TapLayer {
    pub fn new(service_name: String, tap: LogTap) -> Self {
        Self {
            service_name,
            pid: std::process::id(),
            tap,
        }
    }
}

impl<S> Layer<S> for TapLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        if self.tap.subscriber_count() == 0 || !self.tap.accepts(event.metadata().target()) {
            return;
        }
        let entry = LogEntry::from_event(&self.service_name, self.pid, event, &ctx);
        self.tap.publish(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_tap_publishes_events_to_subscribers() {
        let tap = LogTap::new(16);
        let mut rx = tap.subscribe();
        let subscriber =
            tracing_subscriber::registry().with(TapLayer::new("svc".to_string(), tap.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "app::worker", job = "sync", "job finished");
        });

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.target, "app::worker");
        assert_eq!(entry.message, "job finished");
        assert_eq!(entry.service, "svc");
        assert_eq!(entry.pid, std::process::id());
        assert_eq!(entry.string_fields()["job"], "sync");
    }

    #[test]
    fn test_excluded_targets_are_dropped() {
        let tap = LogTap::new(16).excluding(["log_relay", "command_transport"]);
        let mut rx = tap.subscribe();
        let subscriber =
            tracing_subscriber::registry().with(TapLayer::new("svc".to_string(), tap.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "log_relay::forwarder", "forwarded");
            tracing::info!(target: "command_transport::connection", "delivered");
            tracing::info!(target: "app", "kept");
        });

        assert_eq!(rx.try_recv().unwrap().message, "kept");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let tap = LogTap::default();
        assert_eq!(tap.subscriber_count(), 0);
        tap.publish(LogEntry {
            timestamp: String::new(),
            level: "INFO".to_string(),
            service: "svc".to_string(),
            pid: 1,
            target: "app".to_string(),
            message: "nobody listens".to_string(),
            fields: Default::default(),
            span: None,
        });
    }
}

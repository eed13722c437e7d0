//! Log capture for behavioural tests.
//!
//! [`LogCapture`] is a `tracing` layer that records every emitted event as a
//! flat `(level, target, message)` record, with non-message fields appended
//! to the message text. Tests install it as the thread default subscriber
//! and assert on what the code under test logged.

use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// One captured log event.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Event level.
    pub level: Level,
    /// Event target (module path by default).
    pub target: String,
    /// Message text with ` key=value` field pairs appended.
    pub message: String,
}

/// Shared buffer of captured log events.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogCapture {
    /// An empty capture buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install this capture as the thread-default subscriber.
    ///
    /// Keep the returned guard alive for the duration of the test; events on
    /// other threads are not captured.
    #[must_use]
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(CaptureLayer {
            records: Arc::clone(&self.records),
        });
        tracing::subscriber::set_default(subscriber)
    }

    /// All captured records, in emission order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Number of records at the given level.
    pub fn count_at(&self, level: Level) -> usize {
        self.records.lock().iter().filter(|r| r.level == level).count()
    }

    /// Number of records at the given level whose message contains `needle`.
    pub fn count_containing(&self, level: Level, needle: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level && r.message.contains(needle))
            .count()
    }

    /// `true` when any record at the given level contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.count_containing(level, needle) > 0
    }

    /// Drop all captured records.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

struct CaptureLayer {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FlatVisitor::default();
        event.record(&mut visitor);
        self.records.lock().push(LogRecord {
            level: *event.metadata().level(),
            target: event.metadata().target().to_owned(),
            message: visitor.into_message(),
        });
    }
}

#[derive(Default)]
struct FlatVisitor {
    message: String,
    fields: String,
}

impl FlatVisitor {
    fn into_message(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for FlatVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

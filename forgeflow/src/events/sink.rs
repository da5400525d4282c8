//! Event sinks.

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, Level};

/// Observer of run lifecycle events.
///
/// Called inline from stage, supervisor and probe code, so implementations
/// must return quickly and never panic. A sink cannot influence a stage's
/// outcome.
pub trait RunEventSink: Send + Sync {
    /// Records `event` with an optional JSON payload.
    fn try_emit(&self, event: &str, data: Option<Value>);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl RunEventSink for NoOpEventSink {
    fn try_emit(&self, _event: &str, _data: Option<Value>) {}
}

/// Writes events to `tracing`, lifting `stage` and `port` out of the payload
/// into structured fields.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Logs at `level`; anything more verbose than INFO is logged at DEBUG.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Logs at DEBUG.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl RunEventSink for LoggingEventSink {
    fn try_emit(&self, event: &str, data: Option<Value>) {
        let field = |key: &str| {
            data.as_ref()
                .and_then(|d| d.get(key))
                .map(ToString::to_string)
                .unwrap_or_default()
        };
        let stage = field("stage");
        let port = field("port");
        let payload = data.as_ref().map(ToString::to_string).unwrap_or_default();
        if self.level > Level::INFO {
            debug!(event, stage = %stage, port = %port, payload = %payload, "Run event");
        } else {
            info!(event, stage = %stage, port = %port, payload = %payload, "Run event");
        }
    }
}

/// An event captured by [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Dotted event name.
    pub name: String,
    /// Payload, if any.
    pub data: Option<Value>,
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Event names in emission order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name.clone()).collect()
    }

    /// Events whose name starts with `prefix`, e.g. `"process."`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl RunEventSink for CollectingEventSink {
    fn try_emit(&self, event: &str, data: Option<Value>) {
        self.events.lock().push(RecordedEvent {
            name: event.to_string(),
            data,
        });
    }
}

//! Run lifecycle events.
//!
//! Event names are dotted strings; payloads are JSON objects carrying the
//! stage, process and probe fields relevant to the event.

mod sink;

pub use sink::{CollectingEventSink, LoggingEventSink, NoOpEventSink, RecordedEvent, RunEventSink};

/// A stage began executing.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage reached a terminal status.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A supervised service process was launched.
pub const PROCESS_STARTED: &str = "process.started";
/// A supervised service process was stopped.
pub const PROCESS_STOPPED: &str = "process.stopped";
/// One readiness probe attempt completed.
pub const PROBE_ATTEMPT: &str = "probe.attempt";

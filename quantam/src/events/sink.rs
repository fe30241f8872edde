//! Event sinks and the event record they receive.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// One lifecycle event of a run or batch.
///
/// `data` is always a JSON object. Run events carry `run_id`, batch events
/// carry `batch_id`; both carry `pipeline` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowEvent {
    /// Dotted event name such as `stage.retrying` or `batch.progress`.
    pub event_type: String,
    /// Event payload.
    pub data: Value,
}

impl FlowEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Returns a payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Returns whether the event name starts with `prefix`.
    #[must_use]
    pub fn is(&self, prefix: &str) -> bool {
        self.event_type.starts_with(prefix)
    }

    /// Run or batch identifier, whichever the event carries.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.get("run_id")
            .or_else(|| self.get("batch_id"))
            .and_then(Value::as_str)
    }

    /// Name of the stage the event concerns, when it was named.
    #[must_use]
    pub fn stage_name(&self) -> Option<&str> {
        self.get("stage_name").and_then(Value::as_str)
    }
}

/// Receiver for flow lifecycle events.
///
/// Runs report every event through [`EventSink::try_emit`], which must return
/// promptly and never fail. Batches await [`EventSink::emit`] for their
/// closing `batch.completed` or `batch.failed` event, so a sink that forwards
/// events elsewhere can flush there.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Records an event without blocking.
    fn try_emit(&self, event: FlowEvent);

    /// Delivers an event a caller is prepared to wait on.
    async fn emit(&self, event: FlowEvent) {
        self.try_emit(event);
    }
}

/// Discards every event. Used when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event: FlowEvent) {}
}

/// Writes events to `tracing`.
///
/// Failures and timeouts log at `WARN`, retries and cancellations at `INFO`,
/// everything else at `DEBUG`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl LoggingEventSink {
    /// Creates a logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event: FlowEvent) {
        let id = event.correlation_id().unwrap_or_default();
        let stage = event.stage_name().unwrap_or_default();
        let name = event.event_type.as_str();

        if name.ends_with(".failed") || name.ends_with(".timed_out") {
            warn!(event = name, id, stage, data = %event.data, "quantam event");
        } else if name.ends_with(".retrying") || name.ends_with(".cancelled") {
            info!(event = name, id, stage, data = %event.data, "quantam event");
        } else {
            debug!(event = name, id, stage, data = %event.data, "quantam event");
        }
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<FlowEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything received so far.
    #[must_use]
    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.read().clone()
    }

    /// Returns the names of the received events.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Returns the events whose name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<FlowEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.is(prefix))
            .cloned()
            .collect()
    }

    /// Returns the number of received events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event: FlowEvent) {
        self.events.write().push(event);
    }
}

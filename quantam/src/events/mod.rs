//! Event sink system for observability.
//!
//! Runs, stages and batches report lifecycle events (`run.started`,
//! `stage.retrying`, `batch.progress`, ...) to an [`EventSink`]. A flow uses
//! its own sink when one is bound and the process-global sink otherwise.

mod sink;

pub use sink::{CollectingEventSink, EventSink, FlowEvent, LoggingEventSink, NoOpEventSink};

use parking_lot::RwLock;
use std::sync::Arc;

static GLOBAL_EVENT_SINK: RwLock<Option<Arc<dyn EventSink>>> = RwLock::new(None);

/// Sets the current global event sink.
pub fn set_event_sink(sink: Arc<dyn EventSink>) {
    *GLOBAL_EVENT_SINK.write() = Some(sink);
}

/// Clears the current global event sink.
pub fn clear_event_sink() {
    *GLOBAL_EVENT_SINK.write() = None;
}

/// Gets the current global event sink.
///
/// Returns a `NoOpEventSink` if no sink is set.
pub fn get_event_sink() -> Arc<dyn EventSink> {
    GLOBAL_EVENT_SINK
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(NoOpEventSink))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_global_sink_never_panics() {
        let sink = get_event_sink();
        sink.try_emit(FlowEvent::new("run.started", serde_json::json!({})));
    }

    #[tokio::test]
    async fn test_set_and_get_sink() {
        let collecting = Arc::new(CollectingEventSink::new());
        set_event_sink(collecting.clone());

        let retrieved = get_event_sink();
        retrieved.try_emit(FlowEvent::new(
            "run.started",
            serde_json::json!({"run_id": "abc"}),
        ));

        clear_event_sink();
        let started = collecting.events_of_type("run.started");
        assert!(started.iter().any(|e| e.correlation_id() == Some("abc")));
    }
}

//! Bounded-concurrency batch execution.
//!
//! Inputs are dispatched in order with at most `concurrency` runs in flight.
//! Completions arrive in any order and are slotted back by input index.

use super::builder::Flow;
use super::options::{RunManyOptions, RunOptions};
use super::report::{BatchReport, FailureMode};
use crate::cancellation::CancellationToken;
use crate::core::FlowValue;
use crate::errors::QuantamError;
use crate::events::{EventSink, FlowEvent};
use crate::utils::{generate_run_id, iso_timestamp};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Emits `batch.*` events tagged with the batch id.
struct BatchEvents {
    sink: Arc<dyn EventSink>,
    batch_id: Uuid,
    label: String,
    total: usize,
}

impl BatchEvents {
    fn event(&self, event_type: &str, data: serde_json::Value) -> FlowEvent {
        let mut data = data;
        if let Some(map) = data.as_object_mut() {
            map.insert("batch_id".to_string(), json!(self.batch_id.to_string()));
            map.insert("pipeline".to_string(), json!(self.label));
            map.insert("total".to_string(), json!(self.total));
            map.insert("timestamp".to_string(), json!(iso_timestamp()));
        }
        FlowEvent::new(event_type, data)
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        self.sink.try_emit(self.event(event_type, data));
    }

    /// Delivers the closing event and waits for the sink to take it.
    async fn settle(&self, event_type: &str, data: serde_json::Value) {
        self.sink.emit(self.event(event_type, data)).await;
    }

    fn progress(&self, completed: usize, index: usize, ok: bool) {
        self.emit(
            "batch.progress",
            json!({ "completed": completed, "index": index, "ok": ok }),
        );
    }

    async fn failed(&self, completed: usize, index: usize, error: &QuantamError) {
        warn!(index, error = %error, "batch failed");
        self.settle(
            "batch.failed",
            json!({ "completed": completed, "index": index, "error": error.to_dict() }),
        )
        .await;
    }
}

impl<I: FlowValue, O: FlowValue> Flow<I, O> {
    /// Runs the flow over every input with bounded concurrency.
    ///
    /// Output `i` is the result for input `i`. Under [`FailureMode::FailFast`]
    /// the first failure rejects the batch: runs still in flight are dropped
    /// and inputs not yet dispatched never start.
    ///
    /// ```rust
    /// use quantam::{quantam, RunManyOptions};
    ///
    /// # async fn demo() -> Result<(), quantam::QuantamError> {
    /// let flow = quantam::<u32>().step(|n| async move { Ok(n * 2) });
    /// let out = flow
    ///     .run_many(vec![1, 2, 3], RunManyOptions::new().with_concurrency(2))
    ///     .await?;
    /// assert_eq!(out, vec![2, 4, 6]);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a usage error for a zero concurrency, otherwise the failure of
    /// the first run to fail (fail-fast) or of the lowest failing index
    /// (continue-on-failure).
    pub async fn run_many(
        &self,
        inputs: impl IntoIterator<Item = I>,
        options: RunManyOptions,
    ) -> Result<Vec<O>, QuantamError> {
        let concurrency = options.validate()?;
        let inputs: Vec<I> = inputs.into_iter().collect();
        let events = self.batch_events(inputs.len());
        let span = info_span!("quantam.batch", batch_id = %events.batch_id, pipeline = %self.label, total = inputs.len());

        async move {
            events.emit(
                "batch.started",
                json!({ "concurrency": concurrency, "failure_mode": options.failure_mode }),
            );

            let total = inputs.len();
            let runs = self.dispatch(inputs, concurrency, options.signal.as_ref());
            futures::pin_mut!(runs);

            let mut slots: Vec<Option<O>> = std::iter::repeat_with(|| None).take(total).collect();
            let mut first_error: Option<(usize, QuantamError)> = None;
            let mut completed = 0;

            while let Some((index, result)) = runs.next().await {
                completed += 1;
                events.progress(completed, index, result.is_ok());
                match result {
                    Ok(output) => slots[index] = Some(output),
                    Err(e) => match options.failure_mode {
                        FailureMode::FailFast => {
                            events.failed(completed, index, &e).await;
                            return Err(e);
                        }
                        FailureMode::ContinueOnFailure => {
                            if first_error.as_ref().map_or(true, |(i, _)| index < *i) {
                                first_error = Some((index, e));
                            }
                        }
                    },
                }
            }

            if let Some((index, e)) = first_error {
                events.failed(completed, index, &e).await;
                return Err(e);
            }

            debug!(completed, "batch completed");
            events
                .settle("batch.completed", json!({ "completed": completed, "failed": 0 }))
                .await;
            Ok(slots.into_iter().flatten().collect())
        }
        .instrument(span)
        .await
    }

    /// Runs the flow over every input and reports each outcome.
    ///
    /// Never short-circuits; the failure mode in `options` is ignored.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a zero concurrency.
    pub async fn run_many_settled(
        &self,
        inputs: impl IntoIterator<Item = I>,
        options: RunManyOptions,
    ) -> Result<BatchReport<O>, QuantamError> {
        let concurrency = options.validate()?;
        let inputs: Vec<I> = inputs.into_iter().collect();
        let events = self.batch_events(inputs.len());
        let span = info_span!("quantam.batch", batch_id = %events.batch_id, pipeline = %self.label, total = inputs.len());

        async move {
            events.emit(
                "batch.started",
                json!({ "concurrency": concurrency, "failure_mode": "settle" }),
            );

            let total = inputs.len();
            let runs = self.dispatch(inputs, concurrency, options.signal.as_ref());
            futures::pin_mut!(runs);

            let mut slots: Vec<Option<Result<O, QuantamError>>> =
                std::iter::repeat_with(|| None).take(total).collect();
            let mut completed = 0;

            while let Some((index, result)) = runs.next().await {
                completed += 1;
                events.progress(completed, index, result.is_ok());
                slots[index] = Some(result);
            }

            let report = BatchReport::from_results(slots.into_iter().flatten().collect());
            debug!(
                succeeded = report.summary.succeeded,
                failed = report.summary.failed,
                "batch settled"
            );
            events
                .settle(
                    "batch.completed",
                    json!({ "completed": completed, "failed": report.summary.failed }),
                )
                .await;
            Ok(report)
        }
        .instrument(span)
        .await
    }

    fn batch_events(&self, total: usize) -> BatchEvents {
        BatchEvents {
            sink: self.event_sink(),
            batch_id: generate_run_id(),
            label: self.label.clone(),
            total,
        }
    }

    fn dispatch<'a>(
        &'a self,
        inputs: Vec<I>,
        concurrency: usize,
        signal: Option<&Arc<CancellationToken>>,
    ) -> impl Stream<Item = (usize, Result<O, QuantamError>)> + 'a {
        let signal = signal.cloned();
        stream::iter(inputs.into_iter().enumerate())
            .map(move |(index, input)| {
                let options = RunOptions {
                    signal: signal.clone(),
                };
                async move { (index, self.run_with(input, options).await) }
            })
            .buffer_unordered(concurrency)
    }
}

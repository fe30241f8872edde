//! Single-run execution.
//!
//! A run walks the stages in order. Each stage gets one or more attempts;
//! every attempt is raced against the stage deadline and the cancellation
//! signal, and the whole walk is raced against the pipeline deadline.

use super::builder::Flow;
use super::options::RunOptions;
use super::retry::{should_retry, RetryConfig, RetryDecision, RetryState};
use super::spec::{StageSpec, StepContext};
use crate::cancellation::CancellationToken;
use crate::core::{erase, restore, FlowValue, RunStatus, SharedPayload};
use crate::errors::{FailureContext, QuantamError, TimeoutScope};
use crate::events::{EventSink, FlowEvent};
use crate::utils::{duration_ms, generate_run_id, iso_timestamp};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Reason reported when a signal fired without one.
const DEFAULT_CANCEL_REASON: &str = "aborted";

/// Bookkeeping owned by one run.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    pub(crate) status: RunStatus,
    active: Option<FailureContext>,
}

impl RunState {
    fn enter(&mut self, index: usize, stage: &StageSpec, input: SharedPayload) {
        self.status = self.status.advance(RunStatus::Running { stage: index });
        self.active = Some(FailureContext::new(index, stage.name.clone(), input));
    }

    fn record_attempts(&mut self, attempts: usize) {
        if let Some(ref mut ctx) = self.active {
            ctx.attempts = attempts;
        }
    }

    fn context(&self) -> Option<FailureContext> {
        self.active.clone()
    }

    fn finish(&mut self, succeeded: bool) {
        let next = if succeeded {
            RunStatus::Completed
        } else {
            RunStatus::Aborted
        };
        self.status = self.status.advance(next);
    }
}

/// How one attempt ended.
enum AttemptOutcome {
    Succeeded(SharedPayload),
    Failed(anyhow::Error),
    TimedOut(Duration),
    Cancelled,
}

/// Drives one run of a flow.
pub(crate) struct Executor<'a> {
    stages: &'a [StageSpec],
    timeout: Option<Duration>,
    signal: Option<Arc<CancellationToken>>,
    sink: Arc<dyn EventSink>,
    label: &'a str,
    run_id: Uuid,
}

impl<'a> Executor<'a> {
    pub(crate) fn new<I: FlowValue, O: FlowValue>(
        flow: &'a Flow<I, O>,
        signal: Option<Arc<CancellationToken>>,
    ) -> Self {
        Self {
            stages: &flow.stages,
            timeout: flow.timeout,
            signal,
            sink: flow.event_sink(),
            label: &flow.label,
            run_id: generate_run_id(),
        }
    }

    #[cfg(test)]
    pub(crate) fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Runs every stage and settles with the last output or one error.
    pub(crate) async fn run(&self, input: SharedPayload) -> Result<SharedPayload, QuantamError> {
        let span = info_span!("quantam.run", run_id = %self.run_id, pipeline = %self.label);
        self.run_inner(input).instrument(span).await
    }

    async fn run_inner(&self, input: SharedPayload) -> Result<SharedPayload, QuantamError> {
        let started = Instant::now();
        let mut state = RunState::default();
        self.emit(
            "run.started",
            json!({ "stages": self.stages.len(), "timeout_ms": self.timeout.map(duration_ms) }),
        );

        let result = match self.timeout {
            Some(limit) => {
                let outcome = tokio::time::timeout(limit, self.execute(input, &mut state)).await;
                outcome.unwrap_or_else(|_| {
                    warn!(limit_ms = duration_ms(limit), "pipeline timed out");
                    Err(QuantamError::Timeout {
                        scope: TimeoutScope::Pipeline,
                        limit,
                        context: state.context(),
                    })
                })
            }
            None => self.execute(input, &mut state).await,
        };

        state.finish(result.is_ok());
        let elapsed = duration_ms(started.elapsed());
        match result {
            Ok(ref _output) => {
                debug!(duration_ms = elapsed, "run completed");
                self.emit("run.completed", json!({ "duration_ms": elapsed }));
            }
            Err(ref e) => {
                let event = if e.is_timeout() {
                    "run.timed_out"
                } else if e.is_cancelled() {
                    "run.cancelled"
                } else {
                    "run.failed"
                };
                self.emit(event, json!({ "duration_ms": elapsed, "error": e.to_dict() }));
            }
        }
        result
    }

    async fn execute(
        &self,
        input: SharedPayload,
        state: &mut RunState,
    ) -> Result<SharedPayload, QuantamError> {
        self.check_signal(state)?;

        let mut current = input;
        for (index, stage) in self.stages.iter().enumerate() {
            state.enter(index, stage, Arc::clone(&current));
            self.check_signal(state)?;
            current = self.run_stage(index, stage, current, state).await?;
        }
        Ok(current)
    }

    async fn run_stage(
        &self,
        index: usize,
        stage: &StageSpec,
        input: SharedPayload,
        state: &mut RunState,
    ) -> Result<SharedPayload, QuantamError> {
        let policy = stage
            .retry
            .clone()
            .unwrap_or_else(|| RetryConfig::attempts(1, Duration::ZERO));
        let mut retry_state = RetryState::new();
        let label = stage.label(index);

        loop {
            self.check_signal(state)?;
            let attempt = retry_state.attempts_made();
            state.record_attempts(attempt);
            self.emit(
                "stage.started",
                json!({ "stage_index": index, "stage_name": stage.name, "attempt": attempt }),
            );

            let started = Instant::now();
            let ctx = StepContext::new(
                index,
                stage.name.clone(),
                attempt,
                self.run_id,
                self.signal.clone(),
            );
            let failure = match self.attempt(stage, Arc::clone(&input), ctx).await {
                AttemptOutcome::Succeeded(output) => {
                    let elapsed = duration_ms(started.elapsed());
                    debug!(stage = %label, attempt, duration_ms = elapsed, "stage completed");
                    self.emit(
                        "stage.completed",
                        json!({
                            "stage_index": index,
                            "stage_name": stage.name,
                            "attempts": attempt,
                            "duration_ms": elapsed,
                        }),
                    );
                    return Ok(output);
                }
                AttemptOutcome::Cancelled => return Err(self.cancelled(state)),
                AttemptOutcome::Failed(e) => QuantamError::Stage {
                    source: e,
                    context: FailureContext::new(index, stage.name.clone(), Arc::clone(&input))
                        .with_attempts(attempt),
                },
                AttemptOutcome::TimedOut(limit) => QuantamError::Timeout {
                    scope: TimeoutScope::Stage,
                    limit,
                    context: Some(
                        FailureContext::new(index, stage.name.clone(), Arc::clone(&input))
                            .with_attempts(attempt),
                    ),
                },
            };

            match should_retry(&mut retry_state, &policy) {
                RetryDecision::Retry(delay) => {
                    debug!(stage = %label, attempt, delay_ms = duration_ms(delay), error = %failure, "retrying stage");
                    self.emit(
                        "stage.retrying",
                        json!({
                            "stage_index": index,
                            "stage_name": stage.name,
                            "attempt": attempt,
                            "delay_ms": duration_ms(delay),
                            "error": failure.to_string(),
                        }),
                    );
                    self.backoff(delay, state).await?;
                }
                RetryDecision::GiveUp => {
                    warn!(stage = %label, attempts = attempt, error = %failure, "stage failed");
                    self.emit(
                        "stage.failed",
                        json!({
                            "stage_index": index,
                            "stage_name": stage.name,
                            "attempts": attempt,
                            "error": failure.to_string(),
                        }),
                    );
                    return Err(failure);
                }
            }
        }
    }

    async fn attempt(
        &self,
        stage: &StageSpec,
        input: SharedPayload,
        ctx: StepContext,
    ) -> AttemptOutcome {
        let call = async {
            let result = match stage.timeout {
                Some(limit) => match tokio::time::timeout(limit, stage.invoke(input, ctx)).await {
                    Ok(result) => result,
                    Err(_) => return AttemptOutcome::TimedOut(limit),
                },
                None => stage.invoke(input, ctx).await,
            };
            match result {
                Ok(output) => AttemptOutcome::Succeeded(output),
                Err(e) => AttemptOutcome::Failed(e),
            }
        };

        match self.signal {
            Some(ref signal) => tokio::select! {
                biased;
                () = signal.cancelled() => AttemptOutcome::Cancelled,
                outcome = call => outcome,
            },
            None => call.await,
        }
    }

    async fn backoff(&self, delay: Duration, state: &RunState) -> Result<(), QuantamError> {
        match self.signal {
            Some(ref signal) => tokio::select! {
                biased;
                () = signal.cancelled() => Err(self.cancelled(state)),
                () = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn check_signal(&self, state: &RunState) -> Result<(), QuantamError> {
        match self.signal {
            Some(ref signal) if signal.is_cancelled() => Err(self.cancelled(state)),
            _ => Ok(()),
        }
    }

    fn cancelled(&self, state: &RunState) -> QuantamError {
        let reason = self
            .signal
            .as_ref()
            .and_then(|s| s.reason())
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        debug!(reason = %reason, "run cancelled");
        QuantamError::Cancelled {
            reason,
            context: state.context(),
        }
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        let mut data = data;
        if let Some(map) = data.as_object_mut() {
            map.insert("run_id".to_string(), json!(self.run_id.to_string()));
            map.insert("pipeline".to_string(), json!(self.label));
            map.insert("timestamp".to_string(), json!(iso_timestamp()));
        }
        self.sink.try_emit(FlowEvent::new(event_type, data));
    }
}

impl<I: FlowValue, O: FlowValue> Flow<I, O> {
    /// Runs the flow once.
    ///
    /// # Errors
    ///
    /// Rejects with the first unrecovered stage failure, an elapsed deadline,
    /// or cancellation.
    pub async fn run(&self, input: I) -> Result<O, QuantamError> {
        self.run_with(input, RunOptions::default()).await
    }

    /// Runs the flow once with per-run options.
    ///
    /// # Errors
    ///
    /// See [`Flow::run`].
    pub async fn run_with(&self, input: I, options: RunOptions) -> Result<O, QuantamError> {
        let signal = self.effective_signal(options.signal.as_ref());
        let executor = Executor::new(self, signal);
        let output = executor.run(erase(input)).await?;
        restore(&output).map_err(|source| QuantamError::Stage {
            source,
            context: FailureContext::new(self.stages.len(), None, output),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::quantam;

    #[test]
    fn test_run_state_transitions() {
        let mut state = RunState::default();
        assert_eq!(state.status, RunStatus::Pending);

        let stage = StageSpec::step(|n: u8| async move { Ok(n) });
        state.enter(0, &stage, erase(1_u8));
        state.record_attempts(2);
        assert_eq!(state.status, RunStatus::Running { stage: 0 });
        assert_eq!(state.context().map(|c| c.attempts), Some(2));

        state.finish(false);
        assert_eq!(state.status, RunStatus::Aborted);
        state.finish(true);
        assert_eq!(state.status, RunStatus::Aborted);
    }

    #[tokio::test]
    async fn test_events_carry_run_id() {
        let sink = Arc::new(CollectingEventSink::new());
        let flow = quantam::<u8>()
            .step(|n| async move { Ok(n + 1) })
            .labelled("events")
            .with_event_sink(sink.clone());

        let executor = Executor::new(&flow, None);
        let run_id = executor.run_id().to_string();
        let output = executor.run(erase(1_u8)).await.unwrap();
        assert_eq!(restore::<u8>(&output).unwrap(), 2);

        let kinds = sink.event_types();
        assert_eq!(
            kinds,
            vec!["run.started", "stage.started", "stage.completed", "run.completed"]
        );
        for event in sink.events() {
            assert_eq!(event.correlation_id(), Some(run_id.as_str()));
            assert_eq!(event.data["pipeline"], "events");
        }
    }

    #[tokio::test]
    async fn test_empty_flow_returns_input() {
        let flow = quantam::<String>();
        assert_eq!(flow.run("same".to_string()).await.unwrap(), "same");
    }

    #[tokio::test]
    async fn test_failure_emits_stage_failed_and_run_failed() {
        let sink = Arc::new(CollectingEventSink::new());
        let flow = quantam::<u8>()
            .step(|_| async move { Err::<u8, _>(anyhow::anyhow!("nope")) })
            .step(|n: u8| async move { Ok(n) })
            .with_event_sink(sink.clone());

        let err = flow.run(1).await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
        assert_eq!(sink.events_of_type("stage.failed").len(), 1);
        assert_eq!(sink.events_of_type("run.failed").len(), 1);
        assert_eq!(sink.events_of_type("stage.started").len(), 1);
    }
}

//! Fluent flow builder.

use super::options::FlowConfig;
use super::retry::{RetryConfig, DEFAULT_RETRY_DELAY};
use super::spec::{Branch, StageSpec, StepContext};
use crate::cancellation::CancellationToken;
use crate::core::FlowValue;
use crate::errors::UsageError;
use crate::events::{get_event_sink, EventSink};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Label used for flows that were never given one.
pub const DEFAULT_LABEL: &str = "quantam";

/// An immutable-once-run description of a pipeline from `I` to `O`.
///
/// Each chaining call consumes the flow and returns it with the new stage or
/// modifier attached. Per-stage modifiers (`retry`, `step_timeout`, `name`)
/// apply to the most recently added stage and fail with a [`UsageError`] when
/// there is none.
///
/// ```rust
/// use quantam::quantam;
/// use std::time::Duration;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let flow = quantam::<u32>()
///     .step(|n| async move { Ok(n + 1) })
///     .retry(3, Duration::from_millis(10))?
///     .name("increment")?
///     .step(|n: u32| async move { Ok(n.to_string()) });
///
/// assert_eq!(flow.run(41).await?, "42");
/// # Ok(())
/// # }
/// ```
pub struct Flow<I, O> {
    pub(crate) stages: Vec<StageSpec>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) signal: Option<Arc<CancellationToken>>,
    pub(crate) sink: Option<Arc<dyn EventSink>>,
    pub(crate) label: String,
    _types: PhantomData<fn(I) -> O>,
}

/// Creates an empty flow whose input type is `T`.
#[must_use]
pub fn quantam<T: FlowValue>() -> Flow<T, T> {
    Flow::new()
}

impl<T: FlowValue> Flow<T, T> {
    /// Creates an empty flow; running it returns the input unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            timeout: None,
            signal: None,
            sink: None,
            label: DEFAULT_LABEL.to_string(),
            _types: PhantomData,
        }
    }
}

impl<T: FlowValue> Default for Flow<T, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Clone for Flow<I, O> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
            timeout: self.timeout,
            signal: self.signal.clone(),
            sink: self.sink.clone(),
            label: self.label.clone(),
            _types: PhantomData,
        }
    }
}

impl<I, O> std::fmt::Debug for Flow<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("label", &self.label)
            .field("stages", &self.stages)
            .field("timeout", &self.timeout)
            .field("has_signal", &self.signal.is_some())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl<I: FlowValue, O: FlowValue> Flow<I, O> {
    /// Appends a sequential stage.
    #[must_use]
    pub fn step<U, F, Fut>(self, func: F) -> Flow<I, U>
    where
        U: FlowValue,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        self.push(StageSpec::step(func))
    }

    /// Appends a sequential stage whose function also receives the
    /// [`StepContext`] of each attempt: its index, name, attempt number,
    /// run id and signal.
    ///
    /// ```rust
    /// use quantam::{quantam, StepContext};
    ///
    /// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
    /// let flow = quantam::<u32>()
    ///     .step_with_context(|n, ctx: StepContext| async move {
    ///         Ok(format!("{}: {n}", ctx.stage_name.unwrap_or_default()))
    ///     })
    ///     .name("render")?;
    ///
    /// assert_eq!(flow.run(3).await?, "render: 3");
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn step_with_context<U, F, Fut>(self, func: F) -> Flow<I, U>
    where
        U: FlowValue,
        F: Fn(O, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        self.push(StageSpec::step_with_context(func))
    }

    /// Appends a parallel group; its output lists branch results in
    /// declaration order.
    #[must_use]
    pub fn parallel<U: FlowValue>(self, branches: Vec<Branch<O, U>>) -> Flow<I, Vec<U>> {
        self.push(StageSpec::parallel(branches))
    }

    fn push<U>(self, spec: StageSpec) -> Flow<I, U> {
        let mut stages = self.stages;
        stages.push(spec);
        Flow {
            stages,
            timeout: self.timeout,
            signal: self.signal,
            sink: self.sink,
            label: self.label,
            _types: PhantomData,
        }
    }

    fn last_stage(&mut self, modifier: &'static str) -> Result<&mut StageSpec, UsageError> {
        self.stages
            .last_mut()
            .ok_or_else(|| UsageError::no_stage(modifier))
    }

    /// Retries the last stage up to `count` attempts in total.
    ///
    /// The wait before attempt `k + 1` is `delay * 2^(k-1)`; `delay` defaults
    /// to [`DEFAULT_RETRY_DELAY`].
    ///
    /// # Errors
    ///
    /// Fails when no stage exists yet or `count` is zero.
    pub fn retry(
        self,
        count: usize,
        delay: impl Into<Option<Duration>>,
    ) -> Result<Self, UsageError> {
        let delay = delay.into().unwrap_or(DEFAULT_RETRY_DELAY);
        self.retry_with(RetryConfig::attempts(count, delay))
    }

    /// Attaches a full retry policy to the last stage.
    ///
    /// # Errors
    ///
    /// Fails when no stage exists yet or the policy allows zero attempts.
    pub fn retry_with(mut self, config: RetryConfig) -> Result<Self, UsageError> {
        let stage = self.last_stage("retry")?;
        config.validate()?;
        stage.retry = Some(config);
        Ok(self)
    }

    /// Sets the whole-run deadline, replacing any earlier one.
    #[must_use]
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Sets a per-attempt deadline on the last stage.
    ///
    /// # Errors
    ///
    /// Fails when no stage exists yet.
    pub fn step_timeout(mut self, limit: Duration) -> Result<Self, UsageError> {
        self.last_stage("step_timeout")?.timeout = Some(limit);
        Ok(self)
    }

    /// Binds a cancellation signal used by every run without its own.
    #[must_use]
    pub fn with_signal(mut self, signal: Arc<CancellationToken>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Labels the last stage for error messages and events.
    ///
    /// # Errors
    ///
    /// Fails when no stage exists yet.
    pub fn name(mut self, name: impl Into<String>) -> Result<Self, UsageError> {
        self.last_stage("name")?.name = Some(name.into());
        Ok(self)
    }

    /// Routes this flow's events to `sink` instead of the global one.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the label carried by spans and events.
    #[must_use]
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Applies a loaded configuration.
    ///
    /// The timeout replaces the current one when present. The retry policy is
    /// attached to every stage that has none yet.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid.
    pub fn configure(mut self, config: &FlowConfig) -> Result<Self, UsageError> {
        config.validate()?;
        if let Some(limit) = config.timeout() {
            self.timeout = Some(limit);
        }
        if let Some(ref retry) = config.retry {
            for stage in self.stages.iter_mut().filter(|s| s.retry.is_none()) {
                stage.retry = Some(retry.clone());
            }
        }
        Ok(self)
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the pipeline label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the whole-run deadline.
    #[must_use]
    pub fn pipeline_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn event_sink(&self) -> Arc<dyn EventSink> {
        self.sink.clone().unwrap_or_else(get_event_sink)
    }

    pub(crate) fn effective_signal(
        &self,
        run_signal: Option<&Arc<CancellationToken>>,
    ) -> Option<Arc<CancellationToken>> {
        run_signal.or(self.signal.as_ref()).cloned()
    }
}

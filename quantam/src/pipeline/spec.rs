//! Stage descriptors.
//!
//! A flow is an ordered list of [`StageSpec`]s. Each spec wraps its typed
//! function(s) in an erased runner over [`SharedPayload`] so stages with
//! different input and output types can live in one list.

use super::retry::RetryConfig;
use crate::cancellation::CancellationToken;
use crate::core::{erase, restore, FlowValue, SharedPayload, StageKind};
use futures::future::{join_all, BoxFuture};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Future returned by an erased stage runner.
pub(crate) type StageFuture = BoxFuture<'static, anyhow::Result<SharedPayload>>;

/// An erased stage function.
pub(crate) type StageRunner =
    Arc<dyn Fn(SharedPayload, StepContext) -> StageFuture + Send + Sync>;

/// Where an attempt sits in its run, handed to steps added with
/// `step_with_context`.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Zero-based position of the stage in its flow.
    pub stage_index: usize,
    /// Name set with `name`, if any.
    pub stage_name: Option<String>,
    /// One-based attempt number; greater than 1 only on retries.
    pub attempt: usize,
    /// Identifier of the run, as reported in lifecycle events.
    pub run_id: Uuid,
    /// The signal governing this run, if any.
    pub signal: Option<Arc<CancellationToken>>,
}

impl StepContext {
    pub(crate) fn new(
        stage_index: usize,
        stage_name: Option<String>,
        attempt: usize,
        run_id: Uuid,
        signal: Option<Arc<CancellationToken>>,
    ) -> Self {
        Self {
            stage_index,
            stage_name,
            attempt,
            run_id,
            signal,
        }
    }

    /// Returns whether the run's signal has fired.
    ///
    /// Long-running steps can poll this between units of work.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.as_ref().is_some_and(|s| s.is_cancelled())
    }
}

type BranchFn<T, U> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<U>> + Send + Sync>;

/// One member of a parallel group.
///
/// Closures have distinct types, so a group is built from boxed branches;
/// see [`branch`].
pub struct Branch<T, U> {
    func: BranchFn<T, U>,
}

impl<T, U> Clone for Branch<T, U> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
        }
    }
}

impl<T, U> std::fmt::Debug for Branch<T, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("input", &std::any::type_name::<T>())
            .field("output", &std::any::type_name::<U>())
            .finish()
    }
}

/// Boxes an async function into a parallel [`Branch`].
///
/// ```rust
/// use quantam::{branch, quantam};
///
/// let flow = quantam::<u32>().parallel(vec![
///     branch(|n: u32| async move { Ok(n + 1) }),
///     branch(|n: u32| async move { Ok(n * 10) }),
/// ]);
/// # let _ = flow;
/// ```
pub fn branch<T, U, F, Fut>(func: F) -> Branch<T, U>
where
    T: FlowValue,
    U: FlowValue,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
{
    Branch {
        func: Arc::new(move |input: T| -> BoxFuture<'static, anyhow::Result<U>> {
            Box::pin(func(input))
        }),
    }
}

/// Specification of one stage: its runner plus attached modifiers.
#[derive(Clone)]
pub struct StageSpec {
    /// Sequential step or parallel group.
    pub kind: StageKind,
    /// Diagnostic label set with `name`.
    pub name: Option<String>,
    /// Retry policy set with `retry`.
    pub retry: Option<RetryConfig>,
    /// Per-attempt deadline set with `step_timeout`.
    pub timeout: Option<Duration>,
    pub(crate) runner: StageRunner,
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StageSpec {
    /// Creates a sequential step from a typed async function.
    pub(crate) fn step<T, U, F, Fut>(func: F) -> Self
    where
        T: FlowValue,
        U: FlowValue,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        Self::step_with_context(move |input: T, _: StepContext| func(input))
    }

    /// Creates a sequential step whose function also receives the
    /// [`StepContext`] of each attempt.
    pub(crate) fn step_with_context<T, U, F, Fut>(func: F) -> Self
    where
        T: FlowValue,
        U: FlowValue,
        F: Fn(T, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        let func = Arc::new(func);
        let runner: StageRunner =
            Arc::new(move |payload: SharedPayload, ctx: StepContext| -> StageFuture {
                let func = Arc::clone(&func);
                Box::pin(async move {
                    let input: T = restore(&payload)?;
                    let fut = (*func)(input, ctx);
                    let output = fut.await?;
                    Ok(erase(output))
                })
            });

        Self::with_runner(StageKind::Step, runner)
    }

    /// Creates a parallel group whose output is `Vec<U>` in branch order.
    ///
    /// All branches are launched on the same input and every branch settles
    /// before the group completes. If any branch failed, the error of the
    /// first failing branch in declaration order is returned.
    pub(crate) fn parallel<T, U>(branches: Vec<Branch<T, U>>) -> Self
    where
        T: FlowValue,
        U: FlowValue,
    {
        let width = branches.len();
        let branches = Arc::new(branches);
        let runner: StageRunner =
            Arc::new(move |payload: SharedPayload, _: StepContext| -> StageFuture {
                let branches = Arc::clone(&branches);
                Box::pin(async move {
                    let input: T = restore(&payload)?;
                    let results = join_all(branches.iter().map(|b| (b.func)(input.clone()))).await;

                    let mut outputs = Vec::with_capacity(results.len());
                    for (index, result) in results.into_iter().enumerate() {
                        match result {
                            Ok(value) => outputs.push(value),
                            Err(e) => {
                                tracing::debug!(branch = index, error = %e, "parallel branch failed");
                                return Err(e);
                            }
                        }
                    }
                    Ok(erase(outputs))
                })
            });

        Self::with_runner(StageKind::Parallel { width }, runner)
    }

    fn with_runner(kind: StageKind, runner: StageRunner) -> Self {
        Self {
            kind,
            name: None,
            retry: None,
            timeout: None,
            runner,
        }
    }

    /// Starts one attempt of this stage.
    pub(crate) fn invoke(&self, input: SharedPayload, ctx: StepContext) -> StageFuture {
        (self.runner)(input, ctx)
    }

    /// Returns the label used in logs: the name, or `#index`.
    #[must_use]
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("#{index}"))
    }

    /// Returns the number of attempts the stage is allowed.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.retry.as_ref().map_or(1, |r| r.max_attempts)
    }
}

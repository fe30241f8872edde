//! Mock steps and probes for testing flows.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct FlakyState {
    calls: usize,
    call_times: Vec<Instant>,
}

/// A step body that fails a fixed number of times, then passes its input through.
///
/// Clones share the same counters, so a clone can be moved into a stage
/// closure while the test keeps the original for inspection.
///
/// ```rust
/// use quantam::quantam;
/// use quantam::testing::FlakyStep;
///
/// # async fn demo() {
/// let flaky = FlakyStep::new(2);
/// let step = flaky.clone();
/// let flow = quantam::<u32>()
///     .step(move |n| { let step = step.clone(); async move { step.call(n) } })
///     .retry(3, std::time::Duration::from_millis(1))
///     .unwrap();
///
/// assert_eq!(flow.run(7).await.unwrap(), 7);
/// assert_eq!(flaky.call_count(), 3);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FlakyStep {
    failures: usize,
    message: String,
    state: Arc<Mutex<FlakyState>>,
}

impl FlakyStep {
    /// Creates a step that fails the first `failures` calls.
    #[must_use]
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            message: "flaky failure".to_string(),
            state: Arc::new(Mutex::new(FlakyState::default())),
        }
    }

    /// Creates a step that never succeeds.
    #[must_use]
    pub fn always_failing() -> Self {
        Self::new(usize::MAX)
    }

    /// Sets the failure message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Records a call and fails or returns `value`.
    ///
    /// # Errors
    ///
    /// Fails while the configured number of failures is not yet reached.
    pub fn call<T>(&self, value: T) -> anyhow::Result<T> {
        let call = {
            let mut state = self.state.lock();
            state.calls += 1;
            state.call_times.push(Instant::now());
            state.calls
        };

        if call <= self.failures {
            anyhow::bail!("{} (call {call})", self.message);
        }
        Ok(value)
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().calls
    }

    /// Returns the time elapsed between consecutive calls.
    #[must_use]
    pub fn gaps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .call_times
            .windows(2)
            .map(|w| w[1].duration_since(w[0]))
            .collect()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        *self.state.lock() = FlakyState::default();
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    current: usize,
    max: usize,
    calls: usize,
}

/// Tracks how many invocations are in flight at once.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    state: Arc<Mutex<ProbeState>>,
}

/// Marks one invocation in flight until dropped.
#[derive(Debug)]
pub struct ProbeGuard {
    state: Arc<Mutex<ProbeState>>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.state.lock().current -= 1;
    }
}

impl ConcurrencyProbe {
    /// Creates a new probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an invocation as started.
    #[must_use]
    pub fn enter(&self) -> ProbeGuard {
        let mut state = self.state.lock();
        state.current += 1;
        state.calls += 1;
        state.max = state.max.max(state.current);
        ProbeGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs `fut` as one tracked invocation.
    pub async fn track<F: Future>(&self, fut: F) -> F::Output {
        let _guard = self.enter();
        fut.await
    }

    /// Returns the number of invocations currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().current
    }

    /// Returns the highest number of invocations seen in flight.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max
    }

    /// Returns the number of invocations started.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flaky_step_fails_then_passes() {
        let flaky = FlakyStep::new(2).with_message("down");
        assert_eq!(flaky.call(1).unwrap_err().to_string(), "down (call 1)");
        assert!(flaky.call(1).is_err());
        assert_eq!(flaky.call(5).unwrap(), 5);
        assert_eq!(flaky.call_count(), 3);

        flaky.reset();
        assert_eq!(flaky.call_count(), 0);
    }

    #[test]
    fn test_flaky_clones_share_state() {
        let flaky = FlakyStep::always_failing();
        let copy = flaky.clone();
        assert!(copy.call(()).is_err());
        assert_eq!(flaky.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_gaps() {
        let flaky = FlakyStep::new(0);
        flaky.call(()).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        flaky.call(()).unwrap();
        assert_eq!(flaky.gaps(), vec![Duration::from_millis(30)]);
    }

    #[tokio::test]
    async fn test_probe_tracks_max() {
        let probe = ConcurrencyProbe::new();
        let a = probe.enter();
        let b = probe.enter();
        assert_eq!(probe.in_flight(), 2);
        drop(a);
        drop(b);

        probe.track(async {}).await;
        assert_eq!(probe.in_flight(), 0);
        assert_eq!(probe.max_in_flight(), 2);
        assert_eq!(probe.call_count(), 3);
    }
}

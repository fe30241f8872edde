//! Run options and flow configuration.

use super::report::FailureMode;
use super::retry::RetryConfig;
use crate::cancellation::CancellationToken;
use crate::errors::UsageError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default number of runs a batch keeps in flight.
pub const DEFAULT_CONCURRENCY: usize = 512;

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// Options for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Signal for this run; overrides the signal bound to the flow.
    pub signal: Option<Arc<CancellationToken>>,
}

impl RunOptions {
    /// Creates empty run options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation signal.
    #[must_use]
    pub fn with_signal(mut self, signal: Arc<CancellationToken>) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Options for batch execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManyOptions {
    /// Maximum runs in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// What a failed run does to the rest of the batch.
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Signal for every run of the batch; overrides the flow's signal.
    #[serde(skip)]
    pub signal: Option<Arc<CancellationToken>>,
}

impl Default for RunManyOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            failure_mode: FailureMode::default(),
            signal: None,
        }
    }
}

impl RunManyOptions {
    /// Creates batch options with the default concurrency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Sets the cancellation signal.
    #[must_use]
    pub fn with_signal(mut self, signal: Arc<CancellationToken>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Returns the validated concurrency limit.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::InvalidConcurrency`] when the limit is zero.
    pub fn validate(&self) -> Result<usize, UsageError> {
        if self.concurrency == 0 {
            return Err(UsageError::InvalidConcurrency {
                concurrency: self.concurrency,
            });
        }
        Ok(self.concurrency)
    }
}

/// Declarative flow settings, typically loaded from a JSON document.
///
/// ```rust
/// use quantam::FlowConfig;
///
/// let config = FlowConfig::from_json_str(r#"{"timeout_ms": 5000}"#).unwrap();
/// assert_eq!(config.concurrency, 512);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Whole-run deadline in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Retry policy for every stage that has none of its own.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Default batch concurrency.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            retry: None,
            concurrency: default_concurrency(),
        }
    }
}

impl FlowConfig {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::InvalidConfig`] if the JSON is malformed or a
    /// value is out of range.
    pub fn from_json_str(json: &str) -> Result<Self, UsageError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| UsageError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values are usable.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a zero concurrency or a zero-attempt policy.
    pub fn validate(&self) -> Result<(), UsageError> {
        if let Some(ref retry) = self.retry {
            retry.validate()?;
        }
        self.run_many_options().validate()?;
        Ok(())
    }

    /// Returns the pipeline timeout, if configured.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Returns batch options carrying the configured concurrency.
    #[must_use]
    pub fn run_many_options(&self) -> RunManyOptions {
        RunManyOptions::new().with_concurrency(self.concurrency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_run_many_default_concurrency() {
        assert_eq!(RunManyOptions::default().concurrency, 512);
        assert_eq!(RunManyOptions::new().validate(), Ok(512));
    }

    #[test]
    fn test_run_many_rejects_zero_concurrency() {
        let err = RunManyOptions::new().with_concurrency(0).validate().unwrap_err();
        assert_eq!(err, UsageError::InvalidConcurrency { concurrency: 0 });
    }

    #[test]
    fn test_run_many_options_deserialize() {
        let options: RunManyOptions = serde_json::from_str(
            r#"{"concurrency": 16, "failure_mode": "continue_on_failure"}"#,
        )
        .unwrap();
        assert_eq!(options.concurrency, 16);
        assert_eq!(options.failure_mode, FailureMode::ContinueOnFailure);
        assert!(options.signal.is_none());

        let options: RunManyOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.concurrency, 512);
        assert_eq!(options.failure_mode, FailureMode::FailFast);
    }

    #[test]
    fn test_run_options_signal() {
        let token = CancellationToken::shared();
        let options = RunOptions::new().with_signal(token.clone());
        assert!(Arc::ptr_eq(options.signal.as_ref().unwrap(), &token));
    }

    #[test]
    fn test_flow_config_from_json() {
        let config = FlowConfig::from_json_str(
            r#"{"timeout_ms": 5000, "retry": {"max_attempts": 2, "base_delay_ms": 100}, "concurrency": 16}"#,
        )
        .unwrap();

        assert_eq!(config.timeout(), Some(Duration::from_millis(5000)));
        assert_eq!(config.retry.as_ref().map(|r| r.max_attempts), Some(2));
        assert_eq!(config.run_many_options().concurrency, 16);
    }

    #[test]
    fn test_flow_config_defaults() {
        let config = FlowConfig::from_json_str("{}").unwrap();
        assert_eq!(config, FlowConfig::default());
    }

    #[test]
    fn test_flow_config_rejects_bad_values() {
        let err = FlowConfig::from_json_str(r#"{"concurrency": 0}"#).unwrap_err();
        assert_eq!(err, UsageError::InvalidConcurrency { concurrency: 0 });

        let err = FlowConfig::from_json_str(r#"{"retry": {"max_attempts": 0}}"#).unwrap_err();
        assert_eq!(err, UsageError::InvalidRetryCount { count: 0 });

        let err = FlowConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, UsageError::InvalidConfig(_)));
    }
}

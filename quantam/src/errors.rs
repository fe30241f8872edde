//! Error types for quantam pipelines.
//!
//! Every run settles with either its output or exactly one [`QuantamError`].
//! The variants map onto the four failure kinds a caller may need to tell
//! apart: usage mistakes, stage failures, elapsed deadlines and cancellation.

use crate::core::{downcast_ref, SharedPayload};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Raised synchronously while chaining a flow or validating options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    /// A per-stage modifier was attached before any stage was added.
    #[error("`{modifier}` must follow a stage; the pipeline has no stages yet")]
    NoStage {
        /// The modifier that was called (`retry`, `step_timeout`, `name`).
        modifier: &'static str,
    },

    /// A retry policy asked for zero attempts.
    #[error("retry count must be at least 1, got {count}")]
    InvalidRetryCount {
        /// The rejected count.
        count: usize,
    },

    /// A batch asked for zero concurrent runs.
    #[error("concurrency must be at least 1, got {concurrency}")]
    InvalidConcurrency {
        /// The rejected limit.
        concurrency: usize,
    },

    /// A configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl UsageError {
    /// Creates a no-stage error for the given modifier.
    #[must_use]
    pub fn no_stage(modifier: &'static str) -> Self {
        Self::NoStage { modifier }
    }
}

/// Which deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutScope {
    /// A per-stage deadline, raced against each attempt.
    Stage,
    /// The whole-run deadline.
    Pipeline,
}

impl fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage => write!(f, "Step"),
            Self::Pipeline => write!(f, "Pipeline"),
        }
    }
}

/// Coarse classification of a [`QuantamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed chaining or options.
    Usage,
    /// The stage function itself failed.
    Stage,
    /// A deadline elapsed.
    Timeout,
    /// The cancellation signal fired.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage => write!(f, "UsageError"),
            Self::Stage => write!(f, "StageError"),
            Self::Timeout => write!(f, "TimeoutError"),
            Self::Cancelled => write!(f, "AbortError"),
        }
    }
}

/// Where in the pipeline a failure happened.
#[derive(Debug, Clone)]
pub struct FailureContext {
    /// Zero-based index of the stage.
    pub stage_index: usize,
    /// The stage label, if one was set with `name`.
    pub stage_name: Option<String>,
    /// The value that was fed to the stage.
    pub input: SharedPayload,
    /// Attempts made before giving up (0 if the stage never started).
    pub attempts: usize,
}

impl FailureContext {
    /// Creates a new failure context.
    #[must_use]
    pub fn new(stage_index: usize, stage_name: Option<String>, input: SharedPayload) -> Self {
        Self {
            stage_index,
            stage_name,
            input,
            attempts: 0,
        }
    }

    /// Sets the number of attempts made.
    #[must_use]
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    /// Returns the stage label used in messages: its name, or `#index`.
    #[must_use]
    pub fn label(&self) -> String {
        self.stage_name
            .clone()
            .unwrap_or_else(|| format!("#{}", self.stage_index))
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("stage_index".to_string(), serde_json::json!(self.stage_index));
        if let Some(ref name) = self.stage_name {
            map.insert("stage_name".to_string(), serde_json::json!(name));
        }
        map.insert("input".to_string(), serde_json::json!(format!("{:?}", self.input)));
        map.insert("attempts".to_string(), serde_json::json!(self.attempts));
        map
    }
}

/// Renders the `(at step 'name')` suffix for named stages.
struct AtStep<'a>(Option<&'a FailureContext>);

fn at_step(context: &FailureContext) -> AtStep<'_> {
    AtStep(Some(context))
}

fn at_step_opt(context: &Option<FailureContext>) -> AtStep<'_> {
    AtStep(context.as_ref())
}

impl fmt::Display for AtStep<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.and_then(|ctx| ctx.stage_name.as_deref()) {
            Some(name) => write!(f, " (at step '{name}')"),
            None => Ok(()),
        }
    }
}

/// The error a run or batch rejects with.
#[derive(Debug, Error)]
pub enum QuantamError {
    /// Malformed chaining or options.
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// A stage failed and its retries are exhausted.
    #[error("{source}{}", at_step(.context))]
    Stage {
        /// The last error returned by the stage.
        #[source]
        source: anyhow::Error,
        /// Where it happened.
        context: FailureContext,
    },

    /// A deadline elapsed.
    #[error("{scope} timed out after {limit:?}{}", at_step_opt(.context))]
    Timeout {
        /// Which deadline fired.
        scope: TimeoutScope,
        /// The configured limit.
        limit: Duration,
        /// The stage that was active, if any had started.
        context: Option<FailureContext>,
    },

    /// The cancellation signal fired.
    #[error("Pipeline cancelled: {reason}{}", at_step_opt(.context))]
    Cancelled {
        /// The reason passed to `cancel`.
        reason: String,
        /// The stage that was active, if any had started.
        context: Option<FailureContext>,
    },
}

impl QuantamError {
    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_) => ErrorKind::Usage,
            Self::Stage { .. } => ErrorKind::Stage,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Returns true for timeout-kind errors.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true for cancellation-kind errors.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the failure context, if the error happened inside a stage.
    #[must_use]
    pub fn context(&self) -> Option<&FailureContext> {
        match self {
            Self::Usage(_) => None,
            Self::Stage { context, .. } => Some(context),
            Self::Timeout { context, .. } | Self::Cancelled { context, .. } => context.as_ref(),
        }
    }

    /// Returns the name of the failing stage, if it was named.
    #[must_use]
    pub fn stage_name(&self) -> Option<&str> {
        self.context().and_then(|ctx| ctx.stage_name.as_deref())
    }

    /// Returns the input of the failing stage if it has type `T`.
    #[must_use]
    pub fn input<T: 'static>(&self) -> Option<&T> {
        self.context()
            .and_then(|ctx| downcast_ref::<T>(&ctx.input))
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind().to_string()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        match self {
            Self::Timeout { scope, limit, .. } => {
                map.insert("scope".to_string(), serde_json::json!(scope));
                map.insert(
                    "limit_ms".to_string(),
                    serde_json::json!(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)),
                );
            }
            Self::Cancelled { reason, .. } => {
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
            Self::Usage(_) | Self::Stage { .. } => {}
        }
        if let Some(ctx) = self.context() {
            let ctx_map: serde_json::Map<String, serde_json::Value> =
                ctx.to_dict().into_iter().collect();
            map.insert("context".to_string(), serde_json::Value::Object(ctx_map));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::erase;

    fn context(name: Option<&str>) -> FailureContext {
        FailureContext::new(1, name.map(str::to_string), erase("user-7".to_string()))
            .with_attempts(3)
    }

    #[test]
    fn test_usage_error_messages() {
        let err = UsageError::no_stage("retry");
        assert!(err.to_string().contains("`retry` must follow a stage"));

        let err = UsageError::InvalidConcurrency { concurrency: 0 };
        assert_eq!(err.to_string(), "concurrency must be at least 1, got 0");
    }

    #[test]
    fn test_stage_error_named_suffix() {
        let err = QuantamError::Stage {
            source: anyhow::anyhow!("Failed to fetch"),
            context: context(Some("fetchUserData")),
        };
        assert_eq!(err.to_string(), "Failed to fetch (at step 'fetchUserData')");
        assert_eq!(err.stage_name(), Some("fetchUserData"));
        assert_eq!(err.kind(), ErrorKind::Stage);
    }

    #[test]
    fn test_stage_error_unnamed_has_no_suffix() {
        let err = QuantamError::Stage {
            source: anyhow::anyhow!("boom"),
            context: context(None),
        };
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.context().map(FailureContext::label), Some("#1".to_string()));
    }

    #[test]
    fn test_input_downcast() {
        let err = QuantamError::Stage {
            source: anyhow::anyhow!("boom"),
            context: context(None),
        };
        assert_eq!(err.input::<String>().map(String::as_str), Some("user-7"));
        assert!(err.input::<u32>().is_none());
    }

    #[test]
    fn test_timeout_error() {
        let err = QuantamError::Timeout {
            scope: TimeoutScope::Stage,
            limit: Duration::from_millis(50),
            context: Some(context(Some("slow"))),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Step timed out after 50ms (at step 'slow')");
    }

    #[test]
    fn test_cancelled_error_to_dict() {
        let err = QuantamError::Cancelled {
            reason: "user navigated away".to_string(),
            context: None,
        };
        assert!(err.is_cancelled());

        let dict = err.to_dict();
        assert_eq!(dict.get("type").unwrap(), "AbortError");
        assert_eq!(dict.get("reason").unwrap(), "user navigated away");
        assert!(dict.get("context").is_none());
    }

    #[test]
    fn test_error_to_dict_includes_context() {
        let err = QuantamError::Timeout {
            scope: TimeoutScope::Pipeline,
            limit: Duration::from_millis(100),
            context: Some(context(Some("enrich"))),
        };
        let dict = err.to_dict();
        assert_eq!(dict.get("scope").unwrap(), "pipeline");
        assert_eq!(dict.get("limit_ms").unwrap(), 100);
        assert_eq!(dict["context"]["stage_name"], "enrich");
        assert_eq!(dict["context"]["input"], "\"user-7\"");
    }

    #[test]
    fn test_usage_converts() {
        let err: QuantamError = UsageError::InvalidRetryCount { count: 0 }.into();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.context().is_none());
    }
}

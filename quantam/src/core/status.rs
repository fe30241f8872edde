//! Stage kind and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The shape of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StageKind {
    /// A single sequential transformation.
    Step,
    /// A group of branches launched concurrently on the same input.
    Parallel {
        /// Number of branches in the group.
        width: usize,
    },
}

impl Default for StageKind {
    fn default() -> Self {
        Self::Step
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step => write!(f, "step"),
            Self::Parallel { width } => write!(f, "parallel[{width}]"),
        }
    }
}

/// The lifecycle of a single run.
///
/// `Pending -> Running(0) -> Running(1) -> ... -> Completed`, or `Aborted`
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunStatus {
    /// The run has been created but no stage has started.
    Pending,
    /// The stage at `stage` is executing.
    Running {
        /// Zero-based stage index.
        stage: usize,
    },
    /// Every stage succeeded.
    Completed,
    /// The run failed, timed out or was cancelled.
    Aborted,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running { stage } => write!(f, "running({stage})"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl RunStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Returns the active stage index, if a stage is running.
    #[must_use]
    pub fn active_stage(&self) -> Option<usize> {
        match self {
            Self::Running { stage } => Some(*stage),
            _ => None,
        }
    }

    /// Advances to the next state.
    ///
    /// Terminal states are sticky: once completed or aborted a run never
    /// transitions again.
    #[must_use]
    pub fn advance(self, next: Self) -> Self {
        if self.is_terminal() {
            self
        } else {
            next
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Step.to_string(), "step");
        assert_eq!(StageKind::Parallel { width: 3 }.to_string(), "parallel[3]");
    }

    #[test]
    fn test_run_status_display() {
        assert_eq!(RunStatus::Pending.to_string(), "pending");
        assert_eq!(RunStatus::Running { stage: 2 }.to_string(), "running(2)");
        assert_eq!(RunStatus::Aborted.to_string(), "aborted");
    }

    #[test]
    fn test_run_status_is_terminal() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running { stage: 0 }.is_terminal());
    }

    #[test]
    fn test_run_status_terminal_is_sticky() {
        let status = RunStatus::Aborted.advance(RunStatus::Running { stage: 4 });
        assert_eq!(status, RunStatus::Aborted);

        let status = RunStatus::Pending.advance(RunStatus::Running { stage: 0 });
        assert_eq!(status.active_stage(), Some(0));
    }

    #[test]
    fn test_run_status_serialize() {
        let json = serde_json::to_string(&RunStatus::Running { stage: 1 }).unwrap();
        assert_eq!(json, r#"{"state":"running","stage":1}"#);

        let deserialized: RunStatus = serde_json::from_str(r#"{"state":"completed"}"#).unwrap();
        assert_eq!(deserialized, RunStatus::Completed);
    }

    #[test]
    fn test_stage_kind_serialize() {
        let json = serde_json::to_string(&StageKind::Parallel { width: 2 }).unwrap();
        assert_eq!(json, r#"{"kind":"parallel","width":2}"#);
    }
}

//! Failure handling for batch execution.
//!
//! A batch either stops on its first failed run or lets every run settle and
//! records the failures in a [`BatchSummary`].

use crate::errors::QuantamError;
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a batch reacts to a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Reject on the first failure and drop the runs still in flight (default).
    #[default]
    FailFast,
    /// Let every run settle, then reject with the failure of the lowest index.
    ContinueOnFailure,
}

/// Record of one failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Position of the input in the batch.
    pub index: usize,
    /// Error message.
    pub error: String,
    /// Error kind name (`StageError`, `TimeoutError`, ...).
    pub error_type: String,
    /// Label of the failing stage, when known.
    pub stage: Option<String>,
    /// When the failure was recorded.
    pub timestamp: String,
}

impl FailureRecord {
    /// Creates a record from a run error.
    #[must_use]
    pub fn from_error(index: usize, error: &QuantamError) -> Self {
        Self {
            index,
            error: error.to_string(),
            error_type: error.kind().to_string(),
            stage: error.context().map(crate::errors::FailureContext::label),
            timestamp: iso_timestamp(),
        }
    }
}

/// Counts and failures of a settled batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of inputs.
    pub total: usize,
    /// Runs that produced an output.
    pub succeeded: usize,
    /// Runs that rejected.
    pub failed: usize,
    /// One record per failed run, in input order.
    pub failures: Vec<FailureRecord>,
}

impl BatchSummary {
    /// Creates an empty summary for `total` inputs.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Records a successful run.
    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    /// Records a failed run.
    pub fn record_failure(&mut self, record: FailureRecord) {
        self.failed += 1;
        self.failures.push(record);
    }

    /// Returns the fraction of runs that succeeded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total as f64
    }

    /// Returns true if any run failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Converts to dictionary.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("total".to_string(), serde_json::json!(self.total));
        map.insert("succeeded".to_string(), serde_json::json!(self.succeeded));
        map.insert("failed".to_string(), serde_json::json!(self.failed));
        map.insert("success_rate".to_string(), serde_json::json!(self.success_rate()));
        map.insert("failures".to_string(), serde_json::json!(self.failures));
        map
    }
}

/// Outcome of [`Flow::run_many_settled`](super::Flow::run_many_settled).
#[derive(Debug)]
pub struct BatchReport<O> {
    /// One result per input, in input order.
    pub results: Vec<Result<O, QuantamError>>,
    /// Aggregate counts.
    pub summary: BatchSummary,
}

impl<O> BatchReport<O> {
    /// Builds a report from per-input results.
    #[must_use]
    pub fn from_results(results: Vec<Result<O, QuantamError>>) -> Self {
        let mut summary = BatchSummary::new(results.len());
        for (index, result) in results.iter().enumerate() {
            match result {
                Ok(_) => summary.record_success(),
                Err(e) => summary.record_failure(FailureRecord::from_error(index, e)),
            }
        }
        summary.failures.sort_by_key(|f| f.index);
        Self { results, summary }
    }

    /// Returns the successful outputs, skipping failures.
    pub fn outputs(&self) -> impl Iterator<Item = &O> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    /// Returns the failed runs with their indices.
    pub fn errors(&self) -> impl Iterator<Item = (usize, &QuantamError)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().err().map(|e| (i, e)))
    }

    /// Converts into the first error in input order, or all outputs.
    ///
    /// # Errors
    ///
    /// Returns the failure with the lowest index, if any run failed.
    pub fn into_result(self) -> Result<Vec<O>, QuantamError> {
        self.results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::erase;
    use crate::errors::FailureContext;

    fn stage_error(message: &str, name: Option<&str>) -> QuantamError {
        QuantamError::Stage {
            source: anyhow::anyhow!(message.to_string()),
            context: FailureContext::new(0, name.map(str::to_string), erase(1_u8)),
        }
    }

    #[test]
    fn test_failure_mode_default() {
        assert_eq!(FailureMode::default(), FailureMode::FailFast);
    }

    #[test]
    fn test_failure_record_from_error() {
        let record = FailureRecord::from_error(4, &stage_error("boom", Some("load")));
        assert_eq!(record.index, 4);
        assert_eq!(record.error, "boom (at step 'load')");
        assert_eq!(record.error_type, "StageError");
        assert_eq!(record.stage.as_deref(), Some("load"));
    }

    #[test]
    fn test_report_counts() {
        let report = BatchReport::from_results(vec![
            Ok(1),
            Err(stage_error("bad", None)),
            Ok(3),
            Ok(4),
        ]);

        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.succeeded, 3);
        assert_eq!(report.summary.failed, 1);
        assert!((report.summary.success_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(report.outputs().copied().collect::<Vec<_>>(), vec![1, 3, 4]);
        assert_eq!(report.errors().map(|(i, _)| i).collect::<Vec<_>>(), vec![1]);
        assert_eq!(report.summary.failures[0].stage.as_deref(), Some("#0"));
    }

    #[test]
    fn test_into_result_takes_lowest_index() {
        let report: BatchReport<u8> = BatchReport::from_results(vec![
            Ok(1),
            Err(stage_error("first", None)),
            Err(stage_error("second", None)),
        ]);
        let err = report.into_result().unwrap_err();
        assert_eq!(err.to_string(), "first");
    }

    #[test]
    fn test_empty_summary() {
        let summary = BatchSummary::new(0);
        assert!(!summary.has_failures());
        assert!(summary.success_rate().abs() < f64::EPSILON);
        assert_eq!(summary.to_dict()["total"], 0);
    }
}

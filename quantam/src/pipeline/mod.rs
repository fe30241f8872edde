//! Pipeline building and execution.
//!
//! This module provides:
//! - The typed [`Flow`] builder and its stage descriptors
//! - Single-run execution with retries, deadlines and cancellation
//! - Bounded-concurrency batch execution
//! - Retry policies and run options

mod batch;
mod builder;
mod executor;
mod options;
mod report;
mod retry;
mod spec;


pub use builder::{quantam, Flow, DEFAULT_LABEL};
pub use options::{FlowConfig, RunManyOptions, RunOptions, DEFAULT_CONCURRENCY};
pub use report::{BatchReport, BatchSummary, FailureMode, FailureRecord};
pub use retry::{
    should_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState,
    DEFAULT_RETRY_DELAY,
};
pub use spec::{branch, Branch, StageSpec, StepContext};

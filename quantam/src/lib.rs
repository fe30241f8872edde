//! # Quantam
//!
//! Fluent, typed async pipelines for tokio.
//!
//! Quantam composes async functions into a linear pipeline with support for:
//!
//! - **Sequential and parallel stages**: chain steps or fan one value out to several branches
//! - **Retries with exponential backoff**: per stage, with optional jitter
//! - **Deadlines**: per-attempt stage timeouts and a whole-run timeout
//! - **Cancellation**: a shared signal checked before and raced against every attempt
//! - **Batch execution**: run many inputs with bounded concurrency, results in input order
//! - **Event-driven observability**: lifecycle events plus `tracing` spans per run
//!
//! ## Quick Start
//!
//! ```rust
//! use quantam::prelude::*;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let flow = quantam::<u64>()
//!     .step(|id| async move { Ok(format!("user-{id}")) })
//!     .retry(3, Duration::from_millis(100))?
//!     .name("fetchUser")?
//!     .parallel(vec![
//!         branch(|user: String| async move { Ok(user.len()) }),
//!         branch(|user: String| async move { Ok(user.matches('-').count()) }),
//!     ])
//!     .timeout(Duration::from_secs(5));
//!
//! assert_eq!(flow.run(7).await?, vec![6, 1]);
//!
//! let many = flow.run_many(1..=3, RunManyOptions::new().with_concurrency(2)).await?;
//! assert_eq!(many.len(), 3);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod testing;
pub mod utils;

pub use cancellation::CancellationToken;
pub use errors::{ErrorKind, FailureContext, QuantamError, TimeoutScope, UsageError};
pub use pipeline::{
    branch, quantam, BatchReport, Branch, Flow, FlowConfig, RetryConfig, RunManyOptions,
    RunOptions, StepContext,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{FlowValue, RunStatus, StageKind};
    pub use crate::errors::{ErrorKind, FailureContext, QuantamError, TimeoutScope, UsageError};
    pub use crate::events::{
        CollectingEventSink, EventSink, FlowEvent, LoggingEventSink, NoOpEventSink,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        branch, quantam, BackoffStrategy, BatchReport, BatchSummary, Branch, FailureMode, Flow,
        FlowConfig, JitterStrategy, RetryConfig, RunManyOptions, RunOptions, StepContext,
    };
}

//! Testing utilities for quantam flows.
//!
//! This module provides:
//! - Mock step bodies that fail on demand
//! - A probe for measuring in-flight concurrency
//! - Assertions on run outcomes

mod assertions;
mod mocks;

pub use assertions::{assert_cancelled, assert_stage_failure, assert_timeout};
pub use mocks::{ConcurrencyProbe, FlakyStep, ProbeGuard};

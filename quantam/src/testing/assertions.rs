//! Test assertions for run outcomes.

use crate::errors::{QuantamError, TimeoutScope};
use std::fmt::Debug;

/// Asserts that the run rejected with a timeout of the given scope.
pub fn assert_timeout<T: Debug>(result: &Result<T, QuantamError>, scope: TimeoutScope) {
    match result {
        Err(QuantamError::Timeout { scope: actual, .. }) => assert_eq!(
            *actual, scope,
            "Expected {scope:?} timeout, got {actual:?} timeout"
        ),
        other => panic!("Expected {scope:?} timeout, got {other:?}"),
    }
}

/// Asserts that the run rejected because its signal fired.
pub fn assert_cancelled<T: Debug>(result: &Result<T, QuantamError>) {
    assert!(
        matches!(result, Err(QuantamError::Cancelled { .. })),
        "Expected cancellation, got {result:?}"
    );
}

/// Asserts that the run rejected with a stage failure after `attempts` attempts.
pub fn assert_stage_failure<T: Debug>(result: &Result<T, QuantamError>, attempts: usize) {
    match result {
        Err(QuantamError::Stage { context, .. }) => assert_eq!(
            context.attempts, attempts,
            "Expected {attempts} attempts, got {}",
            context.attempts
        ),
        other => panic!("Expected stage failure, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::erase;
    use crate::errors::FailureContext;
    use std::time::Duration;

    #[test]
    fn test_assert_timeout() {
        let result: Result<(), _> = Err(QuantamError::Timeout {
            scope: TimeoutScope::Pipeline,
            limit: Duration::from_millis(10),
            context: None,
        });
        assert_timeout(&result, TimeoutScope::Pipeline);
    }

    #[test]
    #[should_panic(expected = "Expected cancellation")]
    fn test_assert_cancelled_rejects_success() {
        let result: Result<u8, QuantamError> = Ok(1);
        assert_cancelled(&result);
    }

    #[test]
    fn test_assert_stage_failure() {
        let result: Result<(), _> = Err(QuantamError::Stage {
            source: anyhow::anyhow!("boom"),
            context: FailureContext::new(0, None, erase(0_u8)).with_attempts(3),
        });
        assert_stage_failure(&result, 3);
    }
}

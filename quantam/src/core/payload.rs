//! Type-erased values flowing between stages.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Bound satisfied by every value a pipeline can carry.
///
/// Values are cloned once per attempt so a retried stage sees the same input,
/// and rendered with `Debug` when attached to a failure.
pub trait FlowValue: Clone + Debug + Send + Sync + 'static {}

impl<T> FlowValue for T where T: Clone + Debug + Send + Sync + 'static {}

/// An object-safe view over a [`FlowValue`].
pub trait Payload: Debug + Send + Sync {
    /// Returns the value as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns the concrete type name, for diagnostics.
    fn type_name(&self) -> &'static str;
}

impl<T: FlowValue> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Shared handle to an erased stage value.
pub type SharedPayload = Arc<dyn Payload>;

/// Wraps a typed value.
pub fn erase<T: FlowValue>(value: T) -> SharedPayload {
    Arc::new(value)
}

/// Borrows the typed value inside an erased payload, if it holds a `T`.
///
/// `Arc<dyn Payload>` is itself a [`FlowValue`], so method calls on the handle
/// would resolve to the `Arc`. Dispatch goes through the trait object instead.
pub fn downcast_ref<T: 'static>(payload: &SharedPayload) -> Option<&T> {
    <dyn Payload>::as_any(&**payload).downcast_ref::<T>()
}

/// Returns the type name of the value inside an erased payload.
pub fn payload_type_name(payload: &SharedPayload) -> &'static str {
    <dyn Payload>::type_name(&**payload)
}

/// Clones the typed value back out of an erased payload.
///
/// # Errors
///
/// Returns an error naming both types when the payload holds something else.
pub fn restore<T: FlowValue>(payload: &SharedPayload) -> anyhow::Result<T> {
    downcast_ref::<T>(payload).cloned().ok_or_else(|| {
        anyhow::anyhow!(
            "stage value type mismatch: expected {}, found {}",
            std::any::type_name::<T>(),
            payload_type_name(payload)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erase_and_restore() {
        let payload = erase(vec![1_u32, 2, 3]);
        let restored: Vec<u32> = restore(&payload).unwrap();
        assert_eq!(restored, vec![1, 2, 3]);
    }

    #[test]
    fn test_restore_wrong_type() {
        let payload = erase("hello".to_string());
        let err = restore::<u64>(&payload).unwrap_err();
        assert!(err.to_string().contains("expected u64"));
        assert!(err.to_string().contains("String"));
        assert!(!err.to_string().contains("Arc"));
    }

    #[test]
    fn test_downcast_sees_inner_value() {
        let payload = erase(7_u32);
        assert_eq!(downcast_ref::<u32>(&payload), Some(&7));
        assert!(downcast_ref::<SharedPayload>(&payload).is_none());
        assert_eq!(payload_type_name(&payload), "u32");
        assert_eq!(restore::<u32>(&payload).unwrap(), 7);
    }

    #[test]
    fn test_mismatch_names_inner_type() {
        let payload = erase(7_u32);
        let err = restore::<String>(&payload).unwrap_err();
        assert_eq!(
            err.to_string(),
            "stage value type mismatch: expected alloc::string::String, found u32"
        );
    }

    #[test]
    fn test_payload_debug() {
        let payload = erase(42_i32);
        assert_eq!(format!("{payload:?}"), "42");
    }
}

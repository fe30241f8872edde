//! Cancellation token for cooperative cancellation.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn Fn(&str) + Send + Sync>;

/// A token for cooperative cancellation.
///
/// The token is owned by the caller and shared with flows through an `Arc`.
/// Triggering it never interrupts work forcibly; a pipeline observes it at
/// its check points and settles with a cancellation error.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks to invoke on cancellation.
    callbacks: RwLock<Vec<CancelCallback>>,
    /// Wakes tasks parked in [`CancellationToken::cancelled`].
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new shared cancellation token.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    /// Callbacks are invoked immediately. Panics in callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = {
            let mut slot = self.reason.write();
            if slot.is_some() {
                return;
            }
            let reason = reason.into();
            *slot = Some(reason.clone());
            reason
        };

        // Flag and drain share the callbacks lock with `on_cancel`, so a
        // listener is either drained here or sees the flag and runs itself.
        let callbacks = {
            let mut registered = self.callbacks.write();
            self.cancelled.store(true, Ordering::SeqCst);
            std::mem::take(&mut *registered)
        };
        for callback in &callbacks {
            invoke(callback.as_ref(), &reason);
        }

        self.notify.notify_waiters();
    }

    /// Requests cancellation with the default reason.
    pub fn abort(&self) {
        self.cancel("aborted");
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    /// Every registered callback runs exactly once.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut registered = self.callbacks.write();
        if self.is_cancelled() {
            drop(registered);
            let reason = self.reason().unwrap_or_default();
            invoke(&callback, &reason);
        } else {
            registered.push(Box::new(callback));
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once cancellation has been requested.
    ///
    /// Returns immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Enabled before the flag check; a `cancel` in between still wakes us.
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn invoke(callback: &(dyn Fn(&str) + Send + Sync), reason: &str) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(reason))) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_cancel() {
        let token = CancellationToken::new();
        token.cancel("User requested");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("User requested".to_string()));
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel("First reason");
        token.abort();

        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_on_cancel_before_cancellation() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        token.on_cancel(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 0);

        token.cancel("test");
        token.cancel("again");

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_cancel_after_cancellation() {
        let token = CancellationToken::new();
        token.cancel("test");

        let seen = Arc::new(RwLock::new(String::new()));
        let seen_clone = seen.clone();

        token.on_cancel(move |reason| {
            *seen_clone.write() = reason.to_string();
        });

        assert_eq!(*seen.read(), "test");
    }

    #[test]
    fn test_callback_panic_suppressed() {
        let token = CancellationToken::new();

        token.on_cancel(|_| {
            panic!("Intentional panic");
        });

        token.cancel("test");
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_callback_may_register_another() {
        let token = CancellationToken::shared();
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_token = token.clone();
        let inner_counter = counter.clone();
        token.on_cancel(move |_| {
            let counter = inner_counter.clone();
            inner_token.on_cancel(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        token.cancel("stop");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_racing_cancel_fires_once() {
        for _ in 0..200 {
            let token = CancellationToken::shared();
            let fired = Arc::new(AtomicUsize::new(0));
            let start = Arc::new(std::sync::Barrier::new(5));

            std::thread::scope(|scope| {
                for _ in 0..4 {
                    let token = token.clone();
                    let fired = fired.clone();
                    let start = start.clone();
                    scope.spawn(move || {
                        start.wait();
                        for _ in 0..8 {
                            let fired = fired.clone();
                            token.on_cancel(move |_| {
                                fired.fetch_add(1, Ordering::SeqCst);
                            });
                        }
                    });
                }
                let token = token.clone();
                let start = start.clone();
                scope.spawn(move || {
                    start.wait();
                    token.cancel("race");
                });
            });

            assert!(token.is_cancelled());
            assert_eq!(fired.load(Ordering::SeqCst), 32);
        }
    }

    #[tokio::test]
    async fn test_cancelled_returns_when_already_cancelled() {
        let token = CancellationToken::new();
        token.abort();

        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() should resolve immediately");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::shared();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        token.cancel("stop");
        waiter.await.unwrap();
    }

    #[test]
    fn test_cancelled_pending_until_cancel() {
        let token = CancellationToken::new();
        let mut waiter = tokio_test::task::spawn(token.cancelled());
        tokio_test::assert_pending!(waiter.poll());

        token.cancel("stop");
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }
}

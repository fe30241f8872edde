//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a flag plus a registry of listeners. Flows
//! check it before every stage and attempt, and race it against in-flight
//! work so a run settles as soon as the signal is observed.

mod token;

pub use token::{CancelCallback, CancellationToken};

//! Core domain model types for quantam.
//!
//! This module contains the fundamental types used throughout the library:
//! - Stage kind and run status enums
//! - Type-erased payloads carried between stages

mod payload;
mod status;

pub use payload::{
    downcast_ref, erase, payload_type_name, restore, FlowValue, Payload, SharedPayload,
};
pub use status::{RunStatus, StageKind};

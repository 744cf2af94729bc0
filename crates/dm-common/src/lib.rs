//! Drift monitor common types and errors.
//!
//! This crate provides foundational types shared across the workspace:
//! - The record model (`Value`, `Record`, `Schema`) and ingestion payloads
//! - The unified error type with stable codes

pub mod error;
pub mod record;

pub use error::{Error, ErrorCategory, Result, StructuredError, SuggestedAction};
pub use record::{parse_datetime, BatchPayload, Record, Schema, Value};

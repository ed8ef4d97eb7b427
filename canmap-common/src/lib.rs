//! # Canmap Common Library
//!
//! Shared code for the canonical-mapping review engine:
//! - Canonical mapping data model (tables, missing fields, metadata)
//! - Label resolution and display formatting
//! - Event types and the event bus
//! - Configuration loading
//! - Error types

pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod labels;
pub mod mapping;

pub use error::{Error, Result};
pub use job::{FailureKind, JobState, MappingJob};
pub use mapping::{CanonicalMapping, FieldMap, MappingMetadata, MissingField, Row, TableShape, TableValue};

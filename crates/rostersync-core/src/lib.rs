//! Rostersync core - domain models and payload assembly
//!
//! This crate provides the foundational pieces of the rostersync engine:
//! - Ledger record models (courses, users, enrollment events, groups, admins)
//! - Batch and priority types shared by the store and engine crates
//! - The canonical error taxonomy for reconciliation and export
//! - Identifier policy checks for logins, groups, and course keys
//! - Collaborator traits for the student directory, group directory, and
//!   the downstream import consumer
//! - The deduplicating payload collector and delimited row formats

pub mod config;
pub mod directory;
pub mod errors;
pub mod logging;
pub mod model;
pub mod payload;
pub mod policy;

// Re-export commonly used types
pub use config::SyncConfig;
pub use errors::{Result, SyncError};
pub use model::{
    Batch, BatchOutcome, CourseRecord, EnrollmentEvent, EnrollmentStatus, Priority, RecordKind,
    SequenceMarker,
};
pub use payload::{Collector, Row};

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::priority::Priority;
use crate::errors::{Result, SyncError};

/// Enrollment row status as exported downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStatus {
    Active,
    Deleted,
}

impl EnrollmentStatus {
    /// Stable string form used in payload rows and the ledger
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Deleted => "deleted",
        }
    }

    /// Parse the stable string form, case-insensitively
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "active" => Ok(EnrollmentStatus::Active),
            "deleted" => Ok(EnrollmentStatus::Deleted),
            other => Err(SyncError::policy(format!(
                "invalid enrollment status: {}",
                other
            ))),
        }
    }
}

/// Ordering marker for out-of-order enrollment events
///
/// The upstream event stream carries a duplicate-resolution tiebreak alongside
/// the modification timestamp. Markers compare tiebreak first, timestamp
/// second; an event applies only when its marker is >= the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceMarker {
    pub tiebreak: i64,
    pub timestamp: DateTime<Utc>,
}

impl SequenceMarker {
    pub fn new(tiebreak: i64, timestamp: DateTime<Utc>) -> Self {
        Self { tiebreak, timestamp }
    }
}

impl Ord for SequenceMarker {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tiebreak
            .cmp(&other.tiebreak)
            .then(self.timestamp.cmp(&other.timestamp))
    }
}

impl PartialOrd for SequenceMarker {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stored state of one enrollment change, unique per (course, subject, role)
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRecord {
    /// Ledger row id
    pub id: i64,
    pub course_key: String,
    pub subject_id: String,
    pub role: String,
    pub status: EnrollmentStatus,
    pub marker: SequenceMarker,
    /// Owning primary course key, set when the event named a linked section
    pub primary_course_key: Option<String>,
    /// Independent-study instructor the roster is split under
    pub instructor_subject_id: Option<String>,
    pub priority: Priority,
    pub queue_id: Option<i64>,
}

impl EnrollmentRecord {
    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }

    pub fn is_claimed(&self) -> bool {
        self.queue_id.is_some()
    }
}

/// One incoming enrollment change event, before sequencing
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentEvent {
    pub course_key: String,
    pub term_key: String,
    pub subject_id: String,
    pub role: String,
    pub status: EnrollmentStatus,
    pub marker: SequenceMarker,
    pub primary_course_key: Option<String>,
    pub instructor_subject_id: Option<String>,
    /// Whether the owning term is still open for provisioning
    pub term_active: bool,
}

impl EnrollmentEvent {
    /// Course key the ledger record lives under, including the
    /// per-instructor suffix for independent-study sections
    pub fn full_course_key(&self) -> String {
        match &self.instructor_subject_id {
            Some(instructor) => format!("{}-{}", self.course_key, instructor),
            None => self.course_key.clone(),
        }
    }
}

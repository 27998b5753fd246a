use thiserror::Error;

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

/// Canonical error taxonomy for reconciliation and batch export
///
/// Each variant carries a retry disposition:
/// - `NotFound` clears the claim on the affected record without error
/// - `PolicyViolation` is skip-and-log, never auto-retried
/// - `TransientTransport` is always requeued for a later pass
/// - `StaleEvent` is a silent drop, expected under out-of-order delivery
/// - `Conflict` is retried once at the row level after a reload
///
/// Writer and infrastructure failures (`Io`, `Persistence`, `Serialization`)
/// are fatal to the batch in progress and surface as stored batch error text.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Upstream entity vanished between queueing and resolution
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Malformed or disallowed identifier
    #[error("Policy violation: {reason}")]
    PolicyViolation { reason: String },

    /// Transport-level failure talking to a collaborator
    #[error("Transient failure in {op}: {detail}")]
    TransientTransport { op: String, detail: String },

    /// Enrollment event older than the stored row's sequence marker
    #[error("Stale event for {course_key} / {subject_id} / {role}")]
    StaleEvent {
        course_key: String,
        subject_id: String,
        role: String,
    },

    /// Uniqueness collision on insert
    #[error("Conflict on {entity}: {key}")]
    Conflict { entity: String, key: String },

    /// No unclaimed records matched a claim request
    #[error("Empty queue for kind '{kind}'")]
    EmptyQueue { kind: String },

    /// Batch was asked to submit without a written payload
    #[error("Batch {batch_id} has no payload path")]
    MissingPayloadPath { batch_id: i64 },

    /// Filesystem failure while writing a payload
    #[error("I/O failure in {op}: {source}")]
    Io {
        op: String,
        #[source]
        source: std::io::Error,
    },

    /// Ledger database failure
    #[error("Persistence failure in {op}: {detail}")]
    Persistence { op: String, detail: String },

    /// JSON or delimited-row encoding failure
    #[error("Serialization failure: {detail}")]
    Serialization { detail: String },

    /// Invariant breach that indicates a bug, not an environmental failure
    #[error("Internal error: {detail}")]
    Internal { detail: String },
}

impl SyncError {
    /// Create a NotFound error for the given entity description
    pub fn not_found(what: impl Into<String>) -> Self {
        SyncError::NotFound { what: what.into() }
    }

    /// Create a PolicyViolation error
    pub fn policy(reason: impl Into<String>) -> Self {
        SyncError::PolicyViolation {
            reason: reason.into(),
        }
    }

    /// Create a TransientTransport error
    pub fn transient(op: impl Into<String>, detail: impl Into<String>) -> Self {
        SyncError::TransientTransport {
            op: op.into(),
            detail: detail.into(),
        }
    }

    /// Create an I/O error with operation context
    pub fn io(op: impl Into<String>, source: std::io::Error) -> Self {
        SyncError::Io {
            op: op.into(),
            source,
        }
    }

    /// Create a Persistence error with operation context
    pub fn persistence(op: impl Into<String>, detail: impl Into<String>) -> Self {
        SyncError::Persistence {
            op: op.into(),
            detail: detail.into(),
        }
    }

    /// True when the failure should be retried on a later pass
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientTransport { .. })
    }

    /// True when the upstream entity is gone and the claim should be cleared
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }

    /// True when nothing matched a claim request
    pub fn is_empty_queue(&self) -> bool {
        matches!(self, SyncError::EmptyQueue { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization {
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = SyncError::transient("group_lookup", "connection reset");
        assert!(err.is_transient());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_classification() {
        let err = SyncError::not_found("section 2026-spring-TRAIN-101-A");
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_empty_queue_classification() {
        let err = SyncError::EmptyQueue {
            kind: "course".to_string(),
        };
        assert!(err.is_empty_queue());
    }

    #[test]
    fn test_display_carries_context() {
        let err = SyncError::transient("submit", "503");
        assert_eq!(err.to_string(), "Transient failure in submit: 503");
    }
}

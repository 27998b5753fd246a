use chrono::{DateTime, Utc};

use super::priority::{Priority, RecordKind};

/// One export unit: a set of claimed records, the payload directory built
/// from them, and the downstream submission state
///
/// Lifecycle: created → claims records → payload built → submitted → polled →
/// terminal. Terminal batches are deleted, releasing claims per the outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Batch id; the queue claim stamped onto owned records
    pub id: i64,
    pub kind: RecordKind,
    /// Payload directory, set once the collector has written files
    pub payload_path: Option<String>,
    /// HTTP-style status of the submit call
    pub post_status: Option<i64>,
    /// Downstream import id returned by submit
    pub submission_id: Option<String>,
    /// Downstream workflow state as of the last poll
    pub downstream_state: Option<String>,
    /// Downstream progress percentage as of the last poll
    pub progress: i64,
    /// JSON-encoded downstream warnings from the last poll
    pub warnings: Option<String>,
    /// JSON-encoded downstream errors, or local writer failure text
    pub errors: Option<String>,
    pub priority: Priority,
    pub added_at: DateTime<Utc>,
}

impl Batch {
    /// True once submit has recorded a downstream import id
    pub fn is_submitted(&self) -> bool {
        self.submission_id.is_some()
    }
}

/// How a batch finished, as observed from the downstream import status
///
/// Drives the claim-release rule on completion: clean steps priorities down
/// and stamps provisioned_at, warnings restores priorities for a requeue,
/// failed escalates them.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Clean,
    Warnings(String),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_submitted() {
        let mut batch = Batch {
            id: 1,
            kind: RecordKind::Course,
            payload_path: None,
            post_status: None,
            submission_id: None,
            downstream_state: None,
            progress: 0,
            warnings: None,
            errors: None,
            priority: Priority::Default,
            added_at: Utc::now(),
        };
        assert!(!batch.is_submitted());
        batch.submission_id = Some("8847".to_string());
        assert!(batch.is_submitted());
    }
}

use chrono::{DateTime, Utc};

use super::priority::Priority;

/// Provisioned state of one course container
///
/// The natural key is the section-derived course key; a linked (secondary)
/// section's record carries the owning primary course key in `primary_key`.
/// `xlist_key` is the canonical cross-list id computed on the last pass, kept
/// so a later recompute can emit deletions under the old id.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseRecord {
    /// Ledger row id
    pub id: i64,

    /// Natural key, unique across the ledger
    pub course_key: String,

    /// Term the course belongs to
    pub term_key: String,

    /// Owning primary course key, set only for linked sections
    pub primary_key: Option<String>,

    /// Canonical cross-list id as of the last provisioning pass
    pub xlist_key: Option<String>,

    /// When the record entered the ledger
    pub added_at: DateTime<Utc>,

    /// When the record was last exported cleanly
    pub provisioned_at: Option<DateTime<Utc>>,

    /// Set when the last resolution attempt failed in-claim
    pub error_flag: bool,

    /// Error text from the last failed attempt
    pub error: Option<String>,

    /// Queue priority
    pub priority: Priority,

    /// Claiming batch id; None when unclaimed
    pub queue_id: Option<i64>,
}

impl CourseRecord {
    /// True once the course has been exported cleanly at least once
    pub fn is_provisioned(&self) -> bool {
        self.provisioned_at.is_some()
    }

    /// True while a live batch owns this record
    pub fn is_claimed(&self) -> bool {
        self.queue_id.is_some()
    }

    /// Section key the resolver should start from
    pub fn resolve_key(&self) -> &str {
        self.primary_key.as_deref().unwrap_or(&self.course_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(primary: Option<&str>) -> CourseRecord {
        CourseRecord {
            id: 1,
            course_key: "2026-spring-TRAIN-101-A".to_string(),
            term_key: "2026-spring".to_string(),
            primary_key: primary.map(str::to_string),
            xlist_key: None,
            added_at: Utc::now(),
            provisioned_at: None,
            error_flag: false,
            error: None,
            priority: Priority::Default,
            queue_id: None,
        }
    }

    #[test]
    fn test_resolve_key_prefers_primary() {
        assert_eq!(
            record(Some("2026-spring-TRAIN-101-A")).resolve_key(),
            "2026-spring-TRAIN-101-A"
        );
        assert_eq!(record(None).resolve_key(), "2026-spring-TRAIN-101-A");
    }

    #[test]
    fn test_claim_state() {
        let mut rec = record(None);
        assert!(!rec.is_claimed());
        rec.queue_id = Some(7);
        assert!(rec.is_claimed());
    }
}

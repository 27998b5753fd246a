use chrono::{DateTime, Utc};

use super::priority::Priority;

/// Provisioning state of one person
///
/// Tracks which people have had a user row exported at least once, so
/// resolution passes only re-emit user data for unprovisioned persons.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    /// Ledger row id
    pub id: i64,
    /// Directory subject id, unique across the ledger
    pub subject_id: String,
    pub login_id: String,
    pub added_at: DateTime<Utc>,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub queue_id: Option<i64>,
}

impl UserRecord {
    pub fn is_provisioned(&self) -> bool {
        self.provisioned_at.is_some()
    }

    pub fn is_claimed(&self) -> bool {
        self.queue_id.is_some()
    }
}

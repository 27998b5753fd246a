use chrono::{DateTime, Utc};

use super::priority::Priority;

/// Administrative role assignment exported to the downstream account tree
#[derive(Debug, Clone, PartialEq)]
pub struct AdminRecord {
    /// Ledger row id
    pub id: i64,
    pub subject_id: String,
    pub account_key: String,
    pub role: String,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub queue_id: Option<i64>,
}

impl AdminRecord {
    pub fn is_claimed(&self) -> bool {
        self.queue_id.is_some()
    }
}

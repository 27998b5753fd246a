//! Post-commit fast-track hook
//!
//! Priority-raising writes go through the Ledger, which invokes this hook
//! after the write has committed. Keeping the hook explicit and post-commit
//! avoids re-entrant triggering during bulk writes.

use rusqlite::Connection;
use tracing::info;

use rostersync_core::model::Priority;

use crate::errors::{from_rusqlite, Result};

/// Hook invoked after a course's priority was raised
pub trait FastTrackHook: Send + Sync {
    /// Called once per committed priority-raising write
    fn course_priority_raised(
        &self,
        conn: &Connection,
        course_key: &str,
        priority: Priority,
    ) -> Result<()>;
}

/// Does nothing (for tests and single-kind deployments)
pub struct NoopFastTrackHook;

impl FastTrackHook for NoopFastTrackHook {
    fn course_priority_raised(&self, _: &Connection, _: &str, _: Priority) -> Result<()> {
        Ok(())
    }
}

/// Escalates a course's active, unclaimed group bindings when the course
/// itself goes immediate, so the group section provisions in the same wave
pub struct GroupFastTrackHook;

impl FastTrackHook for GroupFastTrackHook {
    fn course_priority_raised(
        &self,
        conn: &Connection,
        course_key: &str,
        priority: Priority,
    ) -> Result<()> {
        if priority < Priority::Immediate {
            return Ok(());
        }

        let changed = conn
            .execute(
                "UPDATE groups SET priority = ?1
                 WHERE course_key = ?2 AND is_deleted IS NULL AND queue_id IS NULL",
                rusqlite::params![Priority::Immediate.as_i64(), course_key],
            )
            .map_err(|e| from_rusqlite("fast_track_groups", e))?;

        if changed > 0 {
            info!(course_key, changed, "fast-tracked group bindings");
        }
        Ok(())
    }
}

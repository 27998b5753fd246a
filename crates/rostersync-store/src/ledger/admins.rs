//! Admin role assignment persistence

use chrono::Utc;
use rusqlite::{Connection, Row};

use rostersync_core::model::{AdminRecord, Priority};

use super::{opt_from_ts, priority_from_sql, to_ts};
use crate::errors::{from_rusqlite, Result};

const COLS: &str = "id, subject_id, account_key, role, is_deleted, deleted_at, priority, queue_id";

fn from_row(row: &Row<'_>) -> rusqlite::Result<AdminRecord> {
    Ok(AdminRecord {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        account_key: row.get(2)?,
        role: row.get(3)?,
        is_deleted: row.get::<_, Option<i64>>(4)?.is_some(),
        deleted_at: opt_from_ts(row.get(5)?),
        priority: priority_from_sql(row.get(6)?)?,
        queue_id: row.get(7)?,
    })
}

/// Upsert an admin role assignment; a deletion is a tombstone so the removal
/// exports before the row drops out of rotation
pub fn set(
    conn: &Connection,
    subject_id: &str,
    account_key: &str,
    role: &str,
    is_deleted: bool,
) -> Result<()> {
    if is_deleted {
        conn.execute(
            "INSERT INTO admins (subject_id, account_key, role, is_deleted, deleted_at, priority)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)
             ON CONFLICT (subject_id, account_key, role) DO UPDATE SET
                is_deleted = 1, deleted_at = excluded.deleted_at, priority = excluded.priority",
            rusqlite::params![
                subject_id,
                account_key,
                role,
                to_ts(Utc::now()),
                Priority::High.as_i64(),
            ],
        )
        .map_err(|e| from_rusqlite("set_admin", e))?;
    } else {
        conn.execute(
            "INSERT INTO admins (subject_id, account_key, role, priority)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (subject_id, account_key, role) DO UPDATE SET
                is_deleted = NULL, deleted_at = NULL, priority = excluded.priority",
            rusqlite::params![subject_id, account_key, role, Priority::High.as_i64()],
        )
        .map_err(|e| from_rusqlite("set_admin", e))?;
    }
    Ok(())
}

/// Admin records claimed under a batch
pub fn queued(conn: &Connection, queue_id: i64) -> Result<Vec<AdminRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM admins WHERE queue_id = ?1 ORDER BY account_key, subject_id",
            COLS
        ))
        .map_err(|e| from_rusqlite("queued_admins", e))?;
    let records = stmt
        .query_map([queue_id], from_row)
        .map_err(|e| from_rusqlite("queued_admins", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| from_rusqlite("queued_admins", e))?;
    Ok(records)
}

//! User record persistence

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use rostersync_core::directory::Person;
use rostersync_core::model::UserRecord;

use super::{from_ts, opt_from_ts, priority_from_sql, to_ts};
use crate::errors::{from_rusqlite, Result};

const COLS: &str = "id, subject_id, login_id, added_at, provisioned_at, priority, queue_id";

fn from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        login_id: row.get(2)?,
        added_at: from_ts(row.get(3)?),
        provisioned_at: opt_from_ts(row.get(4)?),
        priority: priority_from_sql(row.get(5)?)?,
        queue_id: row.get(6)?,
    })
}

/// Fetch a user record by subject id
pub fn get(conn: &Connection, subject_id: &str) -> Result<Option<UserRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE subject_id = ?1", COLS),
        [subject_id],
        from_row,
    )
    .optional()
    .map_err(|e| from_rusqlite("get_user", e))
}

/// Fetch or create the record tracking a person's provisioned state
pub fn get_or_create(conn: &Connection, person: &Person) -> Result<UserRecord> {
    conn.execute(
        "INSERT INTO users (subject_id, login_id, added_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (subject_id) DO UPDATE SET login_id = excluded.login_id",
        rusqlite::params![person.subject_id, person.login_id, to_ts(Utc::now())],
    )
    .map_err(|e| from_rusqlite("get_or_create_user", e))?;

    get(conn, &person.subject_id)?.ok_or_else(|| {
        rostersync_core::SyncError::persistence("get_or_create_user", "row vanished after upsert")
    })
}

/// Stamp an unclaimed user with a batch claim
pub fn claim(conn: &Connection, subject_id: &str, queue_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE users SET queue_id = ?2 WHERE subject_id = ?1 AND queue_id IS NULL",
        rusqlite::params![subject_id, queue_id],
    )
    .map_err(|e| from_rusqlite("claim_user", e))?;
    Ok(())
}

/// Release a claimed user back to the queue without provisioning
pub fn release_claim(conn: &Connection, subject_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET queue_id = NULL WHERE subject_id = ?1",
        [subject_id],
    )
    .map_err(|e| from_rusqlite("release_user_claim", e))?;
    Ok(())
}

/// User records claimed under a batch
pub fn queued(conn: &Connection, queue_id: i64) -> Result<Vec<UserRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM users WHERE queue_id = ?1 ORDER BY provisioned_at, added_at, id",
            COLS
        ))
        .map_err(|e| from_rusqlite("queued_users", e))?;
    let records = stmt
        .query_map([queue_id], from_row)
        .map_err(|e| from_rusqlite("queued_users", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| from_rusqlite("queued_users", e))?;
    Ok(records)
}

//! Enrollment event persistence
//!
//! Row mutation primitives used by the sequencer; the ordering rules live in
//! `crate::sequencer`.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use rostersync_core::model::{
    EnrollmentEvent, EnrollmentRecord, EnrollmentStatus, Priority, SequenceMarker,
};

use super::{from_ts, priority_from_sql, to_ts};
use crate::errors::{from_rusqlite, Result};

const COLS: &str = "id, course_key, subject_id, role, status, tiebreak, event_at, \
                    primary_course_key, instructor_subject_id, priority, queue_id";

fn from_row(row: &Row<'_>) -> rusqlite::Result<EnrollmentRecord> {
    let status: String = row.get(4)?;
    let status = EnrollmentStatus::parse(&status).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("invalid enrollment status {}", status).into(),
        )
    })?;
    Ok(EnrollmentRecord {
        id: row.get(0)?,
        course_key: row.get(1)?,
        subject_id: row.get(2)?,
        role: row.get(3)?,
        status,
        marker: SequenceMarker::new(row.get(5)?, from_ts(row.get(6)?)),
        primary_course_key: row.get(7)?,
        instructor_subject_id: row.get(8)?,
        priority: priority_from_sql(row.get(9)?)?,
        queue_id: row.get(10)?,
    })
}

/// Fetch the row for one (course, subject, role) key
pub fn get(
    conn: &Connection,
    course_key: &str,
    subject_id: &str,
    role: &str,
) -> Result<Option<EnrollmentRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM enrollments
             WHERE course_key = ?1 AND subject_id = ?2 AND role = ?3",
            COLS
        ),
        [course_key, subject_id, role],
        from_row,
    )
    .optional()
    .map_err(|e| from_rusqlite("get_enrollment", e))
}

/// Insert a fresh row from an event; duplicates surface as Conflict
pub fn insert(conn: &Connection, event: &EnrollmentEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO enrollments
         (course_key, subject_id, role, status, tiebreak, event_at,
          primary_course_key, instructor_subject_id, priority)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            event.course_key,
            event.subject_id,
            event.role,
            event.status.as_str(),
            event.marker.tiebreak,
            to_ts(event.marker.timestamp),
            event.primary_course_key,
            event.instructor_subject_id,
            Priority::Default.as_i64(),
        ],
    )
    .map_err(|e| from_rusqlite("insert_enrollment", e))?;
    Ok(())
}

/// Overwrite an existing row from a newer event
pub fn update_from_event(
    conn: &Connection,
    id: i64,
    event: &EnrollmentEvent,
    priority: Priority,
) -> Result<()> {
    conn.execute(
        "UPDATE enrollments SET status = ?2, tiebreak = ?3, event_at = ?4,
             primary_course_key = ?5, instructor_subject_id = ?6, priority = ?7
         WHERE id = ?1",
        rusqlite::params![
            id,
            event.status.as_str(),
            event.marker.tiebreak,
            to_ts(event.marker.timestamp),
            event.primary_course_key,
            event.instructor_subject_id,
            priority.as_i64(),
        ],
    )
    .map_err(|e| from_rusqlite("update_enrollment", e))?;
    Ok(())
}

/// Raise a claimed row's priority without touching its visible state
pub fn set_priority(conn: &Connection, id: i64, priority: Priority) -> Result<()> {
    conn.execute(
        "UPDATE enrollments SET priority = ?2 WHERE id = ?1",
        rusqlite::params![id, priority.as_i64()],
    )
    .map_err(|e| from_rusqlite("set_enrollment_priority", e))?;
    Ok(())
}

/// Drop a claimed row from the queue permanently
pub fn skip(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE enrollments SET queue_id = NULL, priority = ?2 WHERE id = ?1",
        rusqlite::params![id, Priority::None.as_i64()],
    )
    .map_err(|e| from_rusqlite("skip_enrollment", e))?;
    Ok(())
}

/// Rows claimed under a batch, event order
pub fn queued(conn: &Connection, queue_id: i64) -> Result<Vec<EnrollmentRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM enrollments WHERE queue_id = ?1 ORDER BY event_at",
            COLS
        ))
        .map_err(|e| from_rusqlite("queued_enrollments", e))?;
    let records = stmt
        .query_map([queue_id], from_row)
        .map_err(|e| from_rusqlite("queued_enrollments", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| from_rusqlite("queued_enrollments", e))?;
    Ok(records)
}

/// Delete idle rows whose event timestamp fell behind the retention horizon
pub fn purge_expired(conn: &Connection, horizon: DateTime<Utc>) -> Result<usize> {
    let purged = conn
        .execute(
            "DELETE FROM enrollments WHERE priority = ?1 AND event_at < ?2",
            rusqlite::params![Priority::None.as_i64(), to_ts(horizon)],
        )
        .map_err(|e| from_rusqlite("purge_expired_enrollments", e))?;
    Ok(purged)
}

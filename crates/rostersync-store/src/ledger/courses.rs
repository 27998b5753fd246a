//! Course record persistence

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use rostersync_core::directory::SectionDescriptor;
use rostersync_core::model::{CourseRecord, Priority};

use super::{from_ts, opt_from_ts, priority_from_sql, to_ts};
use crate::errors::{from_rusqlite, Result};

const COLS: &str = "id, course_key, term_key, primary_key, xlist_key, added_at, \
                    provisioned_at, error_flag, error, priority, queue_id";

fn from_row(row: &Row<'_>) -> rusqlite::Result<CourseRecord> {
    Ok(CourseRecord {
        id: row.get(0)?,
        course_key: row.get(1)?,
        term_key: row.get(2)?,
        primary_key: row.get(3)?,
        xlist_key: row.get(4)?,
        added_at: from_ts(row.get(5)?),
        provisioned_at: opt_from_ts(row.get(6)?),
        error_flag: row.get::<_, Option<i64>>(7)?.is_some(),
        error: row.get(8)?,
        priority: priority_from_sql(row.get(9)?)?,
        queue_id: row.get(10)?,
    })
}

/// Fetch a course record by natural key
pub fn get(conn: &Connection, course_key: &str) -> Result<Option<CourseRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM courses WHERE course_key = ?1", COLS),
        [course_key],
        from_row,
    )
    .optional()
    .map_err(|e| from_rusqlite("get_course", e))
}

/// Insert a course record if the key is new
pub fn ensure(
    conn: &Connection,
    course_key: &str,
    term_key: &str,
    primary_key: Option<&str>,
    priority: Priority,
) -> Result<()> {
    conn.execute(
        "INSERT INTO courses (course_key, term_key, primary_key, added_at, priority)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (course_key) DO NOTHING",
        rusqlite::params![
            course_key,
            term_key,
            primary_key,
            to_ts(Utc::now()),
            priority.as_i64(),
        ],
    )
    .map_err(|e| from_rusqlite("ensure_course", e))?;
    Ok(())
}

/// Insert a course record, surfacing a Conflict on duplicate keys
pub fn insert_new(
    conn: &Connection,
    course_key: &str,
    term_key: &str,
    primary_key: Option<&str>,
    priority: Priority,
) -> Result<()> {
    conn.execute(
        "INSERT INTO courses (course_key, term_key, primary_key, added_at, priority)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            course_key,
            term_key,
            primary_key,
            to_ts(Utc::now()),
            priority.as_i64(),
        ],
    )
    .map_err(|e| from_rusqlite("insert_course", e))?;
    Ok(())
}

/// Upsert the record for a fetched section and stamp it with the claim
///
/// Primary sections are recorded under their course key; linked sections
/// under their own section key with the owning course in primary_key.
pub fn add_to_queue(conn: &Connection, section: &SectionDescriptor, queue_id: i64) -> Result<()> {
    let (course_key, primary_key) = if section.is_primary {
        (section.course_key.as_str(), None)
    } else {
        (
            section.section_key.as_str(),
            Some(section.course_key.as_str()),
        )
    };

    conn.execute(
        "INSERT INTO courses (course_key, term_key, primary_key, added_at, priority, queue_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (course_key) DO UPDATE SET queue_id = excluded.queue_id",
        rusqlite::params![
            course_key,
            section.term.term_key,
            primary_key,
            to_ts(Utc::now()),
            Priority::Default.as_i64(),
            queue_id,
        ],
    )
    .map_err(|e| from_rusqlite("claim_course_for_section", e))?;
    Ok(())
}

/// Clear the claim without recording an error
pub fn release_claim(conn: &Connection, course_key: &str) -> Result<()> {
    conn.execute(
        "UPDATE courses SET queue_id = NULL WHERE course_key = ?1",
        [course_key],
    )
    .map_err(|e| from_rusqlite("release_course_claim", e))?;
    Ok(())
}

/// Record a lookup failure, keeping the claim
pub fn mark_errored(conn: &Connection, course_key: &str, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE courses SET error_flag = 1, error = ?2 WHERE course_key = ?1",
        rusqlite::params![course_key, error],
    )
    .map_err(|e| from_rusqlite("mark_course_errored", e))?;
    Ok(())
}

/// Refresh ledger state from a fetched section: a withdrawn section drops
/// out of the queue rotation
pub fn update_status(conn: &Connection, section: &SectionDescriptor) -> Result<()> {
    let course_key = if section.is_primary {
        section.course_key.as_str()
    } else {
        section.section_key.as_str()
    };

    if section.is_withdrawn {
        conn.execute(
            "UPDATE courses SET priority = ?2 WHERE course_key = ?1",
            rusqlite::params![course_key, Priority::None.as_i64()],
        )
        .map_err(|e| from_rusqlite("update_course_status", e))?;
    }
    Ok(())
}

/// Keys of linked sections recorded under this primary course
pub fn linked_course_keys(conn: &Connection, course_key: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT course_key FROM courses WHERE primary_key = ?1 ORDER BY course_key")
        .map_err(|e| from_rusqlite("linked_course_keys", e))?;
    let keys = stmt
        .query_map([course_key], |row| row.get(0))
        .map_err(|e| from_rusqlite("linked_course_keys", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| from_rusqlite("linked_course_keys", e))?;
    Ok(keys)
}

/// Keys of courses sharing this course's stored cross-list id
pub fn joint_course_keys(conn: &Connection, course_key: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT course_key FROM courses
             WHERE xlist_key = ?1 AND course_key != ?1 ORDER BY course_key",
        )
        .map_err(|e| from_rusqlite("joint_course_keys", e))?;
    let keys = stmt
        .query_map([course_key], |row| row.get(0))
        .map_err(|e| from_rusqlite("joint_course_keys", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| from_rusqlite("joint_course_keys", e))?;
    Ok(keys)
}

/// Persist a recomputed canonical cross-list id
pub fn set_xlist_key(conn: &Connection, course_key: &str, xlist_key: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE courses SET xlist_key = ?2 WHERE course_key = ?1",
        rusqlite::params![course_key, xlist_key],
    )
    .map_err(|e| from_rusqlite("set_course_xlist_key", e))?;
    Ok(())
}

/// Raise a course's priority; returns whether anything changed
pub fn raise_priority(conn: &Connection, course_key: &str, priority: Priority) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE courses SET priority = ?2 WHERE course_key = ?1 AND priority < ?2",
            rusqlite::params![course_key, priority.as_i64()],
        )
        .map_err(|e| from_rusqlite("raise_course_priority", e))?;
    Ok(changed > 0)
}

/// Course records claimed under a batch, resolution order
pub fn queued(conn: &Connection, queue_id: i64) -> Result<Vec<CourseRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM courses WHERE queue_id = ?1 ORDER BY provisioned_at, added_at, id",
            COLS
        ))
        .map_err(|e| from_rusqlite("queued_courses", e))?;
    let records = stmt
        .query_map([queue_id], from_row)
        .map_err(|e| from_rusqlite("queued_courses", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| from_rusqlite("queued_courses", e))?;
    Ok(records)
}

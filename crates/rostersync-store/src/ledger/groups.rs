//! Group binding, nested-group edge, and section-member persistence

use chrono::Utc;
use rusqlite::{Connection, Row};

use rostersync_core::model::{GroupRecord, LoginKind, Priority, SectionMemberRecord};

use super::{from_ts, opt_from_ts, priority_from_sql, to_ts};
use crate::errors::{from_rusqlite, Result};

const GROUP_COLS: &str = "id, course_key, group_key, role, added_by, added_at, is_deleted, \
                          deleted_by, deleted_at, provisioned_at, priority, queue_id";

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<GroupRecord> {
    Ok(GroupRecord {
        id: row.get(0)?,
        course_key: row.get(1)?,
        group_key: row.get(2)?,
        role: row.get(3)?,
        added_by: row.get(4)?,
        added_at: from_ts(row.get(5)?),
        is_deleted: row.get::<_, Option<i64>>(6)?.is_some(),
        deleted_by: row.get(7)?,
        deleted_at: opt_from_ts(row.get(8)?),
        provisioned_at: opt_from_ts(row.get(9)?),
        priority: priority_from_sql(row.get(10)?)?,
        queue_id: row.get(11)?,
    })
}

const MEMBER_COLS: &str =
    "id, course_key, login, login_kind, role, is_deleted, deleted_at, priority, queue_id";

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<SectionMemberRecord> {
    let kind: String = row.get(3)?;
    let login_kind = LoginKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("invalid login kind {}", kind).into(),
        )
    })?;
    Ok(SectionMemberRecord {
        id: row.get(0)?,
        course_key: row.get(1)?,
        login: row.get(2)?,
        login_kind,
        role: row.get(4)?,
        is_deleted: row.get::<_, Option<i64>>(5)?.is_some(),
        deleted_at: opt_from_ts(row.get(6)?),
        priority: priority_from_sql(row.get(7)?)?,
        queue_id: row.get(8)?,
    })
}

/// Record a course-to-group binding, reactivating a tombstoned one
pub fn add(
    conn: &Connection,
    course_key: &str,
    group_key: &str,
    role: &str,
    added_by: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO groups (course_key, group_key, role, added_by, added_at, priority)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (course_key, group_key, role) DO UPDATE SET
            is_deleted = NULL, deleted_by = NULL, deleted_at = NULL,
            priority = excluded.priority",
        rusqlite::params![
            course_key,
            group_key,
            role,
            added_by,
            to_ts(Utc::now()),
            Priority::High.as_i64(),
        ],
    )
    .map_err(|e| from_rusqlite("add_group", e))?;
    Ok(())
}

/// Active bindings of one course
pub fn active_by_course(conn: &Connection, course_key: &str) -> Result<Vec<GroupRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM groups
             WHERE course_key = ?1 AND is_deleted IS NULL ORDER BY group_key",
            GROUP_COLS
        ))
        .map_err(|e| from_rusqlite("active_groups_by_course", e))?;
    let records = stmt
        .query_map([course_key], group_from_row)
        .map_err(|e| from_rusqlite("active_groups_by_course", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| from_rusqlite("active_groups_by_course", e))?;
    Ok(records)
}

/// Distinct course keys claimed under a group batch
pub fn queued_course_keys(conn: &Connection, queue_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT course_key FROM groups WHERE queue_id = ?1
             GROUP BY course_key ORDER BY course_key",
        )
        .map_err(|e| from_rusqlite("queued_group_course_keys", e))?;
    let keys = stmt
        .query_map([queue_id], |row| row.get(0))
        .map_err(|e| from_rusqlite("queued_group_course_keys", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| from_rusqlite("queued_group_course_keys", e))?;
    Ok(keys)
}

/// Requeue a course's bindings at default priority after a transient failure
pub fn dequeue_course(conn: &Connection, course_key: &str) -> Result<()> {
    conn.execute(
        "UPDATE groups SET priority = ?2, queue_id = NULL WHERE course_key = ?1",
        rusqlite::params![course_key, Priority::Default.as_i64()],
    )
    .map_err(|e| from_rusqlite("dequeue_group_course", e))?;
    Ok(())
}

/// Stop syncing a course's bindings entirely
pub fn deprioritize_course(conn: &Connection, course_key: &str) -> Result<()> {
    conn.execute(
        "UPDATE groups SET priority = ?2, queue_id = NULL WHERE course_key = ?1",
        rusqlite::params![course_key, Priority::None.as_i64()],
    )
    .map_err(|e| from_rusqlite("deprioritize_group_course", e))?;
    Ok(())
}

/// Tombstone every binding of a group the directory no longer knows
pub fn tombstone_not_found(conn: &Connection, group_key: &str) -> Result<()> {
    conn.execute(
        "UPDATE groups SET is_deleted = 1, deleted_by = 'directory', deleted_at = ?2
         WHERE group_key = ?1 AND is_deleted IS NULL",
        rusqlite::params![group_key, to_ts(Utc::now())],
    )
    .map_err(|e| from_rusqlite("tombstone_group_not_found", e))?;
    Ok(())
}

/// Reconcile the persisted nested-group edges of a root group
///
/// Edges found this pass are inserted or reactivated; previously active
/// edges that vanished are tombstoned.
pub fn reconcile_member_groups(
    conn: &Connection,
    root_group_key: &str,
    member_group_keys: &[String],
) -> Result<()> {
    for member_key in member_group_keys {
        conn.execute(
            "INSERT INTO group_member_groups (group_key, root_group_key, is_deleted)
             VALUES (?1, ?2, NULL)
             ON CONFLICT (group_key, root_group_key) DO UPDATE SET is_deleted = NULL",
            rusqlite::params![member_key, root_group_key],
        )
        .map_err(|e| from_rusqlite("reconcile_member_groups", e))?;
    }

    let active = member_groups(conn, root_group_key)?;
    for stale in active
        .iter()
        .filter(|key| !member_group_keys.contains(key))
    {
        conn.execute(
            "UPDATE group_member_groups SET is_deleted = 1
             WHERE group_key = ?1 AND root_group_key = ?2",
            rusqlite::params![stale, root_group_key],
        )
        .map_err(|e| from_rusqlite("reconcile_member_groups", e))?;
    }
    Ok(())
}

/// Active nested-group edges registered under a root group
pub fn member_groups(conn: &Connection, root_group_key: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT group_key FROM group_member_groups
             WHERE root_group_key = ?1 AND is_deleted IS NULL ORDER BY group_key",
        )
        .map_err(|e| from_rusqlite("member_groups", e))?;
    let keys = stmt
        .query_map([root_group_key], |row| row.get(0))
        .map_err(|e| from_rusqlite("member_groups", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| from_rusqlite("member_groups", e))?;
    Ok(keys)
}

/// Cached downstream membership of a course's synthetic group section
pub fn section_members(conn: &Connection, course_key: &str) -> Result<Vec<SectionMemberRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM section_members WHERE course_key = ?1 ORDER BY login",
            MEMBER_COLS
        ))
        .map_err(|e| from_rusqlite("section_members", e))?;
    let records = stmt
        .query_map([course_key], member_from_row)
        .map_err(|e| from_rusqlite("section_members", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| from_rusqlite("section_members", e))?;
    Ok(records)
}

/// Insert or reactivate a cached section member
pub fn activate_member(conn: &Connection, member: &SectionMemberRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO section_members (course_key, login, login_kind, role, is_deleted)
         VALUES (?1, ?2, ?3, ?4, NULL)
         ON CONFLICT (course_key, login, login_kind, role) DO UPDATE SET
            is_deleted = NULL, deleted_at = NULL",
        rusqlite::params![
            member.course_key,
            member.login,
            member.login_kind.as_str(),
            member.role,
        ],
    )
    .map_err(|e| from_rusqlite("activate_section_member", e))?;
    Ok(())
}

/// Tombstone a cached section member
pub fn tombstone_member(conn: &Connection, member: &SectionMemberRecord) -> Result<()> {
    conn.execute(
        "UPDATE section_members SET is_deleted = 1, deleted_at = ?5
         WHERE course_key = ?1 AND login = ?2 AND login_kind = ?3 AND role = ?4",
        rusqlite::params![
            member.course_key,
            member.login,
            member.login_kind.as_str(),
            member.role,
            to_ts(Utc::now()),
        ],
    )
    .map_err(|e| from_rusqlite("tombstone_section_member", e))?;
    Ok(())
}

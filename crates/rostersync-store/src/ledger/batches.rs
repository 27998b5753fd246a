//! Batch persistence and the claim/complete queue operations
//!
//! `claim` is the one place in the system that needs an atomic conditional
//! update: candidate selection and claim stamping run inside an immediate
//! transaction, so two concurrent claims can never return overlapping sets.

use std::path::Path;

use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

use rostersync_core::directory::{ImportStatus, Submission};
use rostersync_core::model::{Batch, BatchOutcome, Priority, RecordKind};
use rostersync_core::SyncError;

use super::{from_ts, priority_from_sql, to_ts};
use crate::errors::{from_rusqlite, Result};

const COLS: &str = "id, kind, payload_path, post_status, submission_id, downstream_state, \
                    progress, warnings, errors, priority, added_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Batch> {
    let kind: String = row.get(1)?;
    let kind = RecordKind::parse(&kind).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("invalid batch kind {}", kind).into(),
        )
    })?;
    Ok(Batch {
        id: row.get(0)?,
        kind,
        payload_path: row.get(2)?,
        post_status: row.get(3)?,
        submission_id: row.get(4)?,
        downstream_state: row.get(5)?,
        progress: row.get(6)?,
        warnings: row.get(7)?,
        errors: row.get(8)?,
        priority: priority_from_sql(row.get(9)?)?,
        added_at: from_ts(row.get(10)?),
    })
}

/// Atomically claim up to `limit` unclaimed records of one kind
pub fn claim(
    conn: &mut Connection,
    kind: RecordKind,
    priority: Priority,
    limit: i64,
) -> Result<Batch> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| from_rusqlite("claim_tx", e))?;

    let batch_id = {
        let candidates = select_candidates(&tx, kind, priority, limit)?;
        if candidates.is_empty() {
            return Err(SyncError::EmptyQueue {
                kind: kind.as_str().to_string(),
            });
        }

        tx.execute(
            "INSERT INTO batches (kind, priority, added_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![kind.as_str(), priority.as_i64(), to_ts(Utc::now())],
        )
        .map_err(|e| from_rusqlite("insert_batch", e))?;
        let batch_id = tx.last_insert_rowid();

        stamp_claims(&tx, kind, &candidates, batch_id)?;
        debug!(batch_id, kind = kind.as_str(), claimed = candidates.len(), "claimed batch");
        batch_id
    };

    tx.commit().map_err(|e| from_rusqlite("claim_commit", e))?;

    get(conn, batch_id)?.ok_or_else(|| {
        SyncError::persistence("claim_batch", format!("batch {} vanished after claim", batch_id))
    })
}

/// Candidate keys for a claim: row ids, except group claims which select
/// distinct course keys
enum Candidates {
    Ids(Vec<i64>),
    CourseKeys(Vec<String>),
}

impl Candidates {
    fn is_empty(&self) -> bool {
        match self {
            Candidates::Ids(ids) => ids.is_empty(),
            Candidates::CourseKeys(keys) => keys.is_empty(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Candidates::Ids(ids) => ids.len(),
            Candidates::CourseKeys(keys) => keys.len(),
        }
    }
}

fn select_candidates(
    conn: &Connection,
    kind: RecordKind,
    priority: Priority,
    limit: i64,
) -> Result<Candidates> {
    let sql = match kind {
        RecordKind::Course => {
            "SELECT id FROM courses
             WHERE priority = ?1 AND queue_id IS NULL AND error_flag IS NULL
             ORDER BY provisioned_at, added_at, id LIMIT ?2"
        }
        RecordKind::User => {
            "SELECT id FROM users
             WHERE priority = ?1 AND queue_id IS NULL
             ORDER BY provisioned_at, added_at, id LIMIT ?2"
        }
        RecordKind::Enrollment => {
            "SELECT id FROM enrollments
             WHERE priority = ?1 AND queue_id IS NULL
             ORDER BY event_at, id LIMIT ?2"
        }
        RecordKind::Admin => {
            "SELECT id FROM admins
             WHERE priority = ?1 AND queue_id IS NULL
             ORDER BY id LIMIT ?2"
        }
        RecordKind::Group => {
            "SELECT course_key FROM groups
             WHERE priority = ?1 AND queue_id IS NULL AND is_deleted IS NULL
             GROUP BY course_key
             ORDER BY MIN(COALESCE(provisioned_at, 0)) LIMIT ?2"
        }
    };

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| from_rusqlite("select_candidates", e))?;

    if kind == RecordKind::Group {
        let keys = stmt
            .query_map(rusqlite::params![priority.as_i64(), limit], |row| {
                row.get(0)
            })
            .map_err(|e| from_rusqlite("select_candidates", e))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| from_rusqlite("select_candidates", e))?;
        Ok(Candidates::CourseKeys(keys))
    } else {
        let ids = stmt
            .query_map(rusqlite::params![priority.as_i64(), limit], |row| {
                row.get(0)
            })
            .map_err(|e| from_rusqlite("select_candidates", e))?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .map_err(|e| from_rusqlite("select_candidates", e))?;
        Ok(Candidates::Ids(ids))
    }
}

fn stamp_claims(
    conn: &Connection,
    kind: RecordKind,
    candidates: &Candidates,
    batch_id: i64,
) -> Result<()> {
    let stamped = match candidates {
        Candidates::Ids(ids) => {
            let table = match kind {
                RecordKind::Course => "courses",
                RecordKind::User => "users",
                RecordKind::Enrollment => "enrollments",
                RecordKind::Admin => "admins",
                RecordKind::Group => unreachable!("group claims use course keys"),
            };
            let placeholders = vec!["?"; ids.len()].join(",");
            let sql = format!(
                "UPDATE {} SET queue_id = ? WHERE id IN ({}) AND queue_id IS NULL",
                table, placeholders
            );
            let params = std::iter::once(batch_id).chain(ids.iter().copied());
            conn.execute(&sql, rusqlite::params_from_iter(params))
                .map_err(|e| from_rusqlite("stamp_claims", e))?
        }
        Candidates::CourseKeys(keys) => {
            // Group claims pull every binding of the selected courses and
            // reset their priority now that they are in process
            let placeholders = vec!["?"; keys.len()].join(",");
            let sql = format!(
                "UPDATE groups SET queue_id = ?, priority = ?
                 WHERE course_key IN ({}) AND queue_id IS NULL",
                placeholders
            );
            let params: Vec<rusqlite::types::Value> = [
                rusqlite::types::Value::Integer(batch_id),
                rusqlite::types::Value::Integer(Priority::Default.as_i64()),
            ]
            .into_iter()
            .chain(
                keys.iter()
                    .map(|key| rusqlite::types::Value::Text(key.clone())),
            )
            .collect();
            conn.execute(&sql, rusqlite::params_from_iter(params))
                .map_err(|e| from_rusqlite("stamp_claims", e))?
        }
    };

    if stamped < candidates.len() {
        return Err(SyncError::Conflict {
            entity: "claim_batch".to_string(),
            key: format!("stamped {} of {} candidates", stamped, candidates.len()),
        });
    }
    Ok(())
}

/// Fetch a batch by id
pub fn get(conn: &Connection, batch_id: i64) -> Result<Option<Batch>> {
    conn.query_row(
        &format!("SELECT {} FROM batches WHERE id = ?1", COLS),
        [batch_id],
        from_row,
    )
    .optional()
    .map_err(|e| from_rusqlite("get_batch", e))
}

/// Batches submitted downstream and awaiting a terminal verdict
pub fn awaiting_status(conn: &Connection) -> Result<Vec<Batch>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM batches WHERE submission_id IS NOT NULL ORDER BY added_at",
            COLS
        ))
        .map_err(|e| from_rusqlite("batches_awaiting_status", e))?;
    let batches = stmt
        .query_map([], from_row)
        .map_err(|e| from_rusqlite("batches_awaiting_status", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| from_rusqlite("batches_awaiting_status", e))?;
    Ok(batches)
}

pub fn set_payload_path(conn: &Connection, batch_id: i64, path: &Path) -> Result<()> {
    conn.execute(
        "UPDATE batches SET payload_path = ?2 WHERE id = ?1",
        rusqlite::params![batch_id, path.to_string_lossy()],
    )
    .map_err(|e| from_rusqlite("set_payload_path", e))?;
    Ok(())
}

pub fn record_submission(conn: &Connection, batch_id: i64, submission: &Submission) -> Result<()> {
    conn.execute(
        "UPDATE batches SET post_status = 200, submission_id = ?2, downstream_state = ?3
         WHERE id = ?1",
        rusqlite::params![batch_id, submission.id, submission.state],
    )
    .map_err(|e| from_rusqlite("record_submission", e))?;
    Ok(())
}

pub fn record_post_failure(conn: &Connection, batch_id: i64, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE batches SET post_status = 500, errors = ?2 WHERE id = ?1",
        rusqlite::params![batch_id, error],
    )
    .map_err(|e| from_rusqlite("record_post_failure", e))?;
    Ok(())
}

pub fn record_poll(conn: &Connection, batch_id: i64, status: &ImportStatus) -> Result<()> {
    let warnings = if status.warnings.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&status.warnings)?)
    };
    let errors = if status.errors.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&status.errors)?)
    };

    conn.execute(
        "UPDATE batches SET downstream_state = ?2, progress = ?3, warnings = ?4, errors = ?5
         WHERE id = ?1",
        rusqlite::params![batch_id, status.state, status.progress, warnings, errors],
    )
    .map_err(|e| from_rusqlite("record_poll", e))?;
    Ok(())
}

/// Record a local writer failure against the batch
pub fn record_error(conn: &Connection, batch_id: i64, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE batches SET errors = ?2 WHERE id = ?1",
        rusqlite::params![batch_id, error],
    )
    .map_err(|e| from_rusqlite("record_batch_error", e))?;
    Ok(())
}

/// Release a finished batch's claims per the outcome rule and delete it
///
/// - Clean: claims cleared, provisioned_at stamped, priorities stepped down
///   (enrollment events decrement one level; the other kinds return to
///   default rotation)
/// - Warnings: claims cleared with priorities untouched so the records
///   requeue; warning text recorded on the records
/// - Failed: claims cleared, priorities escalated, error text recorded
pub fn complete(conn: &mut Connection, batch: &Batch, outcome: &BatchOutcome) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| from_rusqlite("complete_tx", e))?;
    let now = to_ts(Utc::now());

    match outcome {
        BatchOutcome::Clean => {
            tx.execute(
                "UPDATE courses SET queue_id = NULL, provisioned_at = ?2, priority = ?3,
                     error = NULL
                 WHERE queue_id = ?1 AND error_flag IS NULL",
                rusqlite::params![batch.id, now, Priority::Default.as_i64()],
            )
            .map_err(|e| from_rusqlite("complete_courses", e))?;
            // Records that errored in-claim missed the export; release them
            // back into rotation with their error text kept
            tx.execute(
                "UPDATE courses SET queue_id = NULL, error_flag = NULL WHERE queue_id = ?1",
                [batch.id],
            )
            .map_err(|e| from_rusqlite("complete_courses", e))?;

            tx.execute(
                "UPDATE users SET queue_id = NULL, provisioned_at = ?2, priority = ?3
                 WHERE queue_id = ?1",
                rusqlite::params![batch.id, now, Priority::Default.as_i64()],
            )
            .map_err(|e| from_rusqlite("complete_users", e))?;

            tx.execute(
                "UPDATE enrollments SET queue_id = NULL, priority = priority - 1
                 WHERE queue_id = ?1 AND priority > 0",
                [batch.id],
            )
            .map_err(|e| from_rusqlite("complete_enrollments", e))?;
            tx.execute(
                "UPDATE enrollments SET queue_id = NULL WHERE queue_id = ?1",
                [batch.id],
            )
            .map_err(|e| from_rusqlite("complete_enrollments", e))?;

            tx.execute(
                "UPDATE groups SET queue_id = NULL, provisioned_at = ?2, priority = ?3
                 WHERE queue_id = ?1",
                rusqlite::params![batch.id, now, Priority::Default.as_i64()],
            )
            .map_err(|e| from_rusqlite("complete_groups", e))?;

            tx.execute(
                "UPDATE admins SET queue_id = NULL,
                     priority = CASE WHEN is_deleted IS NULL THEN ?2 ELSE ?3 END
                 WHERE queue_id = ?1",
                rusqlite::params![
                    batch.id,
                    Priority::Default.as_i64(),
                    Priority::None.as_i64()
                ],
            )
            .map_err(|e| from_rusqlite("complete_admins", e))?;
        }
        BatchOutcome::Warnings(text) => {
            release_all(&tx, batch.id, None, Some(text))?;
        }
        BatchOutcome::Failed(text) => {
            release_all(&tx, batch.id, Some(Priority::High), Some(text))?;
        }
    }

    tx.execute("DELETE FROM batches WHERE id = ?1", [batch.id])
        .map_err(|e| from_rusqlite("delete_batch", e))?;

    tx.commit().map_err(|e| from_rusqlite("complete_commit", e))?;

    info!(
        batch_id = batch.id,
        kind = batch.kind.as_str(),
        clean = matches!(outcome, BatchOutcome::Clean),
        "batch completed"
    );
    Ok(())
}

/// Delete a batch that produced no payload, restoring its claims untouched
pub fn delete_empty(conn: &mut Connection, batch: &Batch) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| from_rusqlite("delete_empty_tx", e))?;

    release_all(&tx, batch.id, None, None)?;
    tx.execute("DELETE FROM batches WHERE id = ?1", [batch.id])
        .map_err(|e| from_rusqlite("delete_batch", e))?;

    tx.commit()
        .map_err(|e| from_rusqlite("delete_empty_commit", e))?;
    Ok(())
}

/// Clear claims on every record table, optionally escalating priority and
/// recording error text
fn release_all(
    conn: &Connection,
    batch_id: i64,
    escalate_to: Option<Priority>,
    error: Option<&str>,
) -> Result<()> {
    for table in ["courses", "users", "enrollments", "groups", "admins"] {
        // Courses errored in-claim drop the flag on release so they requeue
        let clear_flag = if table == "courses" {
            ", error_flag = NULL"
        } else {
            ""
        };
        let sql = match (escalate_to, error) {
            (Some(_), Some(_)) => format!(
                "UPDATE {} SET queue_id = NULL{}, priority = ?2, error = ?3 WHERE queue_id = ?1",
                table, clear_flag
            ),
            (Some(_), None) => format!(
                "UPDATE {} SET queue_id = NULL{}, priority = ?2 WHERE queue_id = ?1",
                table, clear_flag
            ),
            (None, Some(_)) => format!(
                "UPDATE {} SET queue_id = NULL{}, error = ?2 WHERE queue_id = ?1",
                table, clear_flag
            ),
            (None, None) => format!(
                "UPDATE {} SET queue_id = NULL{} WHERE queue_id = ?1",
                table, clear_flag
            ),
        };

        match (escalate_to, error) {
            (Some(p), Some(text)) => conn
                .execute(&sql, rusqlite::params![batch_id, p.as_i64(), text])
                .map_err(|e| from_rusqlite("release_all", e))?,
            (Some(p), None) => conn
                .execute(&sql, rusqlite::params![batch_id, p.as_i64()])
                .map_err(|e| from_rusqlite("release_all", e))?,
            (None, Some(text)) => conn
                .execute(&sql, rusqlite::params![batch_id, text])
                .map_err(|e| from_rusqlite("release_all", e))?,
            (None, None) => conn
                .execute(&sql, [batch_id])
                .map_err(|e| from_rusqlite("release_all", e))?,
        };
    }

    conn.execute(
        "UPDATE section_members SET queue_id = NULL WHERE queue_id = ?1",
        [batch_id],
    )
    .map_err(|e| from_rusqlite("release_all", e))?;
    Ok(())
}

/// Delete unsubmitted batches older than the horizon, restoring their claims
pub fn release_stale(conn: &mut Connection, older_than: Duration) -> Result<usize> {
    let cutoff = to_ts(Utc::now() - older_than);
    let stale: Vec<Batch> = {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM batches WHERE submission_id IS NULL AND added_at < ?1",
                COLS
            ))
            .map_err(|e| from_rusqlite("release_stale", e))?;
        let rows = stmt
            .query_map([cutoff], from_row)
            .map_err(|e| from_rusqlite("release_stale", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| from_rusqlite("release_stale", e))?;
        rows
    };

    for batch in &stale {
        delete_empty(conn, batch)?;
    }
    Ok(stale.len())
}

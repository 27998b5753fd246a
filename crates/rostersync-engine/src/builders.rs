//! Batch builders for the flat record kinds
//!
//! Course and group batches go through the resolver and the reconciler;
//! users, admins, and enrollment events are emitted straight from their
//! claimed ledger rows.

use tracing::warn;

use rostersync_core::directory::StudentDirectory;
use rostersync_core::model::EnrollmentRecord;
use rostersync_core::payload::{
    AdminRow, EnrollmentRow, Row, UserRow, STATUS_ACTIVE, STATUS_DELETED,
};
use rostersync_core::{Collector, Result};
use rostersync_store::Ledger;

/// Emit user rows for a claimed user batch
pub fn build_users(
    ledger: &mut Ledger,
    directory: &dyn StudentDirectory,
    collector: &mut Collector,
    batch_id: i64,
) -> Result<()> {
    for user in ledger.queued_users(batch_id)? {
        let person = if user.login_id.contains('@') {
            directory.person_by_external(&user.login_id)
        } else {
            directory.person_by_login(&user.login_id)
        };
        match person {
            Ok(person) => {
                collector.add(Row::User(UserRow::from_person(&person, STATUS_ACTIVE)));
            }
            Err(err) if err.is_transient() => {
                warn!(login = %user.login_id, error = %err, "person lookup failed, requeued");
                ledger.release_user_claim(&user.subject_id)?;
            }
            Err(err) => {
                warn!(login = %user.login_id, error = %err, "person skipped");
            }
        }
    }
    Ok(())
}

/// Emit admin rows, active and tombstoned, for a claimed admin batch
pub fn build_admins(ledger: &mut Ledger, collector: &mut Collector, batch_id: i64) -> Result<()> {
    for admin in ledger.queued_admins(batch_id)? {
        let status = if admin.is_deleted {
            STATUS_DELETED
        } else {
            STATUS_ACTIVE
        };
        collector.add(Row::Admin(AdminRow {
            subject_id: admin.subject_id,
            account_key: admin.account_key,
            role: admin.role,
            status: status.to_string(),
        }));
    }
    Ok(())
}

/// Emit enrollment rows from claimed enrollment events
pub fn build_enrollments(
    ledger: &mut Ledger,
    collector: &mut Collector,
    batch_id: i64,
) -> Result<()> {
    for record in ledger.queued_enrollments(batch_id)? {
        match EnrollmentRow::for_subject(
            &container_key(&record),
            &record.subject_id,
            &record.role,
            record.status.as_str(),
        ) {
            Ok(row) => {
                collector.add(Row::Enrollment(row));
            }
            // A row that cannot serialize will never serialize; drop it
            // from the queue instead of failing the batch
            Err(err) => {
                warn!(
                    course_key = %record.course_key,
                    subject_id = %record.subject_id,
                    error = %err,
                    "event cannot serialize, dropped from queue"
                );
                ledger.skip_enrollment(&record)?;
            }
        }
    }
    Ok(())
}

/// Downstream container an event lands in: the owning course, with the
/// per-instructor suffix for independent-study sections
fn container_key(record: &EnrollmentRecord) -> String {
    let course = record
        .primary_course_key
        .as_deref()
        .unwrap_or(&record.course_key);
    match &record.instructor_subject_id {
        Some(instructor) => format!("{}-{}", course, instructor),
        None => course.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rostersync_core::model::{EnrollmentStatus, Priority, SequenceMarker};

    fn record(primary: Option<&str>, instructor: Option<&str>) -> EnrollmentRecord {
        EnrollmentRecord {
            id: 1,
            course_key: "2026-spring-TRAIN-600-A".to_string(),
            subject_id: "9136CCB8F66711D5BE060004AC494FFE".to_string(),
            role: "student".to_string(),
            status: EnrollmentStatus::Active,
            marker: SequenceMarker::new(0, Utc.timestamp_opt(1_760_000_000, 0).unwrap()),
            primary_course_key: primary.map(str::to_string),
            instructor_subject_id: instructor.map(str::to_string),
            priority: Priority::Default,
            queue_id: None,
        }
    }

    #[test]
    fn test_container_key_plain() {
        assert_eq!(container_key(&record(None, None)), "2026-spring-TRAIN-600-A");
    }

    #[test]
    fn test_container_key_prefers_primary() {
        assert_eq!(
            container_key(&record(Some("2026-spring-TRAIN-600-B"), None)),
            "2026-spring-TRAIN-600-B"
        );
    }

    #[test]
    fn test_container_key_suffixes_instructor() {
        assert_eq!(
            container_key(&record(None, Some("FBB38FE46A7C11D5A4AE0004AC494FFE"))),
            "2026-spring-TRAIN-600-A-FBB38FE46A7C11D5A4AE0004AC494FFE"
        );
    }
}

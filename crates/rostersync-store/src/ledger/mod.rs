//! Ledger / queue manager
//!
//! One facade over the per-kind record tables. All persistence goes through
//! here; the engine crates never see a connection. Claiming is the sole
//! operation that needs an atomic conditional update, and it runs inside an
//! immediate transaction so concurrent claims never overlap.

pub mod admins;
pub mod batches;
pub mod courses;
pub mod enrollments;
pub mod groups;
pub mod users;

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::info;

use rostersync_core::directory::{ImportStatus, Person, SectionDescriptor, Submission};
use rostersync_core::model::{
    AdminRecord, Batch, BatchOutcome, CourseRecord, EnrollmentEvent, EnrollmentRecord,
    GroupRecord, Priority, RecordKind, SectionMemberRecord, UserRecord,
};

use crate::db;
use crate::errors::Result;
use crate::hook::{FastTrackHook, NoopFastTrackHook};
use crate::migrations::apply_migrations;
use crate::sequencer::{self, EventDisposition};

/// Seconds-precision timestamp stored in the ledger
pub(crate) fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub(crate) fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

pub(crate) fn opt_from_ts(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Map a stored priority integer inside a rusqlite row closure
pub(crate) fn priority_from_sql(value: i64) -> rusqlite::Result<Priority> {
    Priority::from_i64(value).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("invalid priority value {}", value).into(),
        )
    })
}

/// SQLite-backed ledger of pending and provisioned records
pub struct Ledger {
    conn: Connection,
    hook: Box<dyn FastTrackHook>,
}

impl Ledger {
    /// Open (and migrate) a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut conn = db::open(path)?;
        db::configure(&conn)?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn,
            hook: Box::new(NoopFastTrackHook),
        })
    }

    /// Open an in-memory ledger (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = db::open_in_memory()?;
        db::configure(&conn)?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn,
            hook: Box::new(NoopFastTrackHook),
        })
    }

    /// Replace the post-commit fast-track hook
    pub fn with_hook(mut self, hook: Box<dyn FastTrackHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Borrow the raw connection (test setup and maintenance jobs)
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ----- batch claim / release -----

    /// Atomically claim up to `limit` unclaimed records of one kind under a
    /// new batch
    ///
    /// # Errors
    ///
    /// `SyncError::EmptyQueue` when no records match.
    pub fn claim_batch(
        &mut self,
        kind: RecordKind,
        priority: Priority,
        limit: i64,
    ) -> Result<Batch> {
        batches::claim(&mut self.conn, kind, priority, limit)
    }

    /// Release a finished batch's claims per the outcome rule and delete it
    pub fn complete_batch(&mut self, batch: &Batch, outcome: BatchOutcome) -> Result<()> {
        batches::complete(&mut self.conn, batch, &outcome)
    }

    /// Delete a batch that produced no payload, restoring its claims
    pub fn delete_empty_batch(&mut self, batch: &Batch) -> Result<()> {
        batches::delete_empty(&mut self.conn, batch)
    }

    pub fn get_batch(&self, batch_id: i64) -> Result<Option<Batch>> {
        batches::get(&self.conn, batch_id)
    }

    /// Batches that have been submitted and are awaiting a downstream verdict
    pub fn batches_awaiting_status(&self) -> Result<Vec<Batch>> {
        batches::awaiting_status(&self.conn)
    }

    pub fn set_batch_payload_path(&mut self, batch_id: i64, path: &Path) -> Result<()> {
        batches::set_payload_path(&self.conn, batch_id, path)
    }

    pub fn record_submission(&mut self, batch_id: i64, submission: &Submission) -> Result<()> {
        batches::record_submission(&self.conn, batch_id, submission)
    }

    pub fn record_post_failure(&mut self, batch_id: i64, error: &str) -> Result<()> {
        batches::record_post_failure(&self.conn, batch_id, error)
    }

    pub fn record_poll(&mut self, batch_id: i64, status: &ImportStatus) -> Result<()> {
        batches::record_poll(&self.conn, batch_id, status)
    }

    /// Record a local writer failure against the batch
    pub fn record_batch_error(&mut self, batch_id: i64, error: &str) -> Result<()> {
        batches::record_error(&self.conn, batch_id, error)
    }

    /// Manual-unstick primitive for claims stranded by a crashed process
    ///
    /// Deletes unsubmitted batches older than the horizon, restoring their
    /// claims. Nothing calls this automatically.
    pub fn release_stale_claims(&mut self, older_than: Duration) -> Result<usize> {
        let released = batches::release_stale(&mut self.conn, older_than)?;
        if released > 0 {
            info!(released, "released stale batch claims");
        }
        Ok(released)
    }

    // ----- courses -----

    pub fn get_course(&self, course_key: &str) -> Result<Option<CourseRecord>> {
        courses::get(&self.conn, course_key)
    }

    /// Create an unclaimed course record if one does not exist
    pub fn add_course(
        &mut self,
        course_key: &str,
        term_key: &str,
        primary_key: Option<&str>,
        priority: Priority,
    ) -> Result<()> {
        courses::ensure(&self.conn, course_key, term_key, primary_key, priority)
    }

    /// Course records claimed under a batch, resolution order
    pub fn queued_courses(&self, queue_id: i64) -> Result<Vec<CourseRecord>> {
        courses::queued(&self.conn, queue_id)
    }

    /// Upsert the record for a fetched section and stamp it with the claim
    pub fn claim_course_for_section(
        &mut self,
        section: &SectionDescriptor,
        queue_id: i64,
    ) -> Result<()> {
        courses::add_to_queue(&self.conn, section, queue_id)
    }

    /// Clear the claim without recording an error (upstream entity vanished)
    pub fn release_course_claim(&mut self, course_key: &str) -> Result<()> {
        courses::release_claim(&self.conn, course_key)
    }

    /// Record a lookup failure, keeping the claim so batch failure requeues it
    pub fn mark_course_errored(&mut self, course_key: &str, error: &str) -> Result<()> {
        courses::mark_errored(&self.conn, course_key, error)
    }

    /// Refresh ledger state from a fetched section descriptor
    pub fn update_course_status(&mut self, section: &SectionDescriptor) -> Result<()> {
        courses::update_status(&self.conn, section)
    }

    /// Keys of linked sections recorded under this primary course
    pub fn linked_course_keys(&self, course_key: &str) -> Result<Vec<String>> {
        courses::linked_course_keys(&self.conn, course_key)
    }

    /// Keys of courses cross-referenced to this course's container
    pub fn joint_course_keys(&self, course_key: &str) -> Result<Vec<String>> {
        courses::joint_course_keys(&self.conn, course_key)
    }

    pub fn set_course_xlist_key(&mut self, course_key: &str, xlist_key: Option<&str>) -> Result<()> {
        courses::set_xlist_key(&self.conn, course_key, xlist_key)
    }

    /// Raise a course's priority, invoking the fast-track hook post-commit
    pub fn raise_course_priority(&mut self, course_key: &str, priority: Priority) -> Result<bool> {
        let raised = courses::raise_priority(&self.conn, course_key, priority)?;
        if raised {
            self.hook
                .course_priority_raised(&self.conn, course_key, priority)?;
        }
        Ok(raised)
    }

    // ----- users -----

    pub fn get_or_create_user(&mut self, person: &Person) -> Result<UserRecord> {
        users::get_or_create(&self.conn, person)
    }

    /// Stamp an unclaimed user with the given batch claim
    pub fn claim_user(&mut self, subject_id: &str, queue_id: i64) -> Result<()> {
        users::claim(&self.conn, subject_id, queue_id)
    }

    pub fn queued_users(&self, queue_id: i64) -> Result<Vec<UserRecord>> {
        users::queued(&self.conn, queue_id)
    }

    /// Release a claimed user back to the queue without provisioning
    pub fn release_user_claim(&mut self, subject_id: &str) -> Result<()> {
        users::release_claim(&self.conn, subject_id)
    }

    // ----- enrollment events -----

    /// Sequence one incoming enrollment change event
    pub fn apply_event(&mut self, event: &EnrollmentEvent) -> Result<EventDisposition> {
        sequencer::apply_event(&self.conn, self.hook.as_ref(), event)
    }

    pub fn get_enrollment(
        &self,
        course_key: &str,
        subject_id: &str,
        role: &str,
    ) -> Result<Option<EnrollmentRecord>> {
        enrollments::get(&self.conn, course_key, subject_id, role)
    }

    pub fn queued_enrollments(&self, queue_id: i64) -> Result<Vec<EnrollmentRecord>> {
        enrollments::queued(&self.conn, queue_id)
    }

    /// Drop a claimed enrollment event from the queue permanently
    ///
    /// For rows that cannot serialize into a payload; per-record failures
    /// never abort the batch they ride in.
    pub fn skip_enrollment(&mut self, record: &EnrollmentRecord) -> Result<()> {
        enrollments::skip(&self.conn, record.id)
    }

    /// Purge idle enrollment events older than the retention horizon
    pub fn purge_expired_events(&mut self, retention_days: i64) -> Result<usize> {
        let horizon = Utc::now() - Duration::days(retention_days);
        enrollments::purge_expired(&self.conn, horizon)
    }

    // ----- groups -----

    /// Record a course-to-group binding
    pub fn add_group(
        &mut self,
        course_key: &str,
        group_key: &str,
        role: &str,
        added_by: &str,
    ) -> Result<()> {
        groups::add(&self.conn, course_key, group_key, role, added_by)
    }

    pub fn active_groups_by_course(&self, course_key: &str) -> Result<Vec<GroupRecord>> {
        groups::active_by_course(&self.conn, course_key)
    }

    /// Distinct course keys claimed under a group batch
    pub fn queued_group_course_keys(&self, queue_id: i64) -> Result<Vec<String>> {
        groups::queued_course_keys(&self.conn, queue_id)
    }

    /// Requeue a course's group bindings after a transient failure
    pub fn dequeue_group_course(&mut self, course_key: &str) -> Result<()> {
        groups::dequeue_course(&self.conn, course_key)
    }

    /// Stop syncing a course's group bindings (course gone downstream)
    pub fn deprioritize_group_course(&mut self, course_key: &str) -> Result<()> {
        groups::deprioritize_course(&self.conn, course_key)
    }

    /// Tombstone every binding of a group the directory no longer knows
    pub fn tombstone_group_not_found(&mut self, group_key: &str) -> Result<()> {
        groups::tombstone_not_found(&self.conn, group_key)
    }

    /// Reconcile the persisted nested-group edges of a root group
    pub fn reconcile_member_groups(
        &mut self,
        root_group_key: &str,
        member_group_keys: &[String],
    ) -> Result<()> {
        groups::reconcile_member_groups(&self.conn, root_group_key, member_group_keys)
    }

    /// Active nested-group edges registered under a root group
    pub fn member_groups(&self, root_group_key: &str) -> Result<Vec<String>> {
        groups::member_groups(&self.conn, root_group_key)
    }

    /// Cached downstream membership of a course's synthetic group section
    pub fn section_members(&self, course_key: &str) -> Result<Vec<SectionMemberRecord>> {
        groups::section_members(&self.conn, course_key)
    }

    /// Insert or reactivate a cached section member
    pub fn activate_section_member(&mut self, member: &SectionMemberRecord) -> Result<()> {
        groups::activate_member(&self.conn, member)
    }

    /// Tombstone a cached section member
    pub fn tombstone_section_member(&mut self, member: &SectionMemberRecord) -> Result<()> {
        groups::tombstone_member(&self.conn, member)
    }

    // ----- admins -----

    /// Upsert an admin role assignment
    pub fn set_admin(
        &mut self,
        subject_id: &str,
        account_key: &str,
        role: &str,
        is_deleted: bool,
    ) -> Result<()> {
        admins::set(&self.conn, subject_id, account_key, role, is_deleted)
    }

    pub fn queued_admins(&self, queue_id: i64) -> Result<Vec<AdminRecord>> {
        admins::queued(&self.conn, queue_id)
    }
}

//! Enrollment event sequencer
//!
//! Applies out-of-order enrollment change events idempotently. Ordering is
//! decided by the event's sequence marker (tiebreak first, then timestamp);
//! an event older than the stored row is dropped as stale. Events for
//! courses that have not provisioned yet escalate the course instead of
//! mutating enrollment state, since initial provisioning picks up live data.

use rusqlite::Connection;
use tracing::{debug, info};

use rostersync_core::model::{EnrollmentEvent, Priority};
use rostersync_core::SyncError;

use crate::errors::Result;
use crate::hook::FastTrackHook;
use crate::ledger::{courses, enrollments};

/// What the sequencer did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// New row inserted
    Inserted,
    /// Existing row updated in place
    Updated,
    /// Row is claimed by an in-flight batch; priority raised, visible
    /// effect deferred to the next batch
    Deferred,
    /// Event marker older than the stored row; dropped
    Stale,
    /// Owning course unprovisioned; course escalated, event discarded
    CourseEscalated,
    /// Owning term closed; event discarded
    TermInactive,
}

/// Sequence one incoming enrollment change event
pub fn apply_event(
    conn: &Connection,
    hook: &dyn FastTrackHook,
    event: &EnrollmentEvent,
) -> Result<EventDisposition> {
    apply_with_retry(conn, hook, event, true)
}

fn apply_with_retry(
    conn: &Connection,
    hook: &dyn FastTrackHook,
    event: &EnrollmentEvent,
    retry: bool,
) -> Result<EventDisposition> {
    let full_course_key = event.full_course_key();

    match courses::get(conn, &full_course_key)? {
        Some(course) if course.is_provisioned() => apply_row(conn, event, retry),
        Some(_) => {
            info!(
                course_key = %full_course_key,
                subject_id = %event.subject_id,
                "event for unprovisioned course, escalating"
            );
            escalate_course(conn, hook, &full_course_key)?;
            Ok(EventDisposition::CourseEscalated)
        }
        None => {
            if !event.term_active {
                debug!(
                    course_key = %full_course_key,
                    subject_id = %event.subject_id,
                    "event for inactive term, dropped"
                );
                return Ok(EventDisposition::TermInactive);
            }

            // Initial course provisioning effectively picks up the event
            match courses::insert_new(
                conn,
                &full_course_key,
                &event.term_key,
                event.primary_course_key.as_deref(),
                Priority::High,
            ) {
                Ok(()) => Ok(EventDisposition::CourseEscalated),
                Err(SyncError::Conflict { .. }) if retry => {
                    apply_with_retry(conn, hook, event, false)
                }
                Err(err) => Err(err),
            }
        }
    }
}

fn apply_row(
    conn: &Connection,
    event: &EnrollmentEvent,
    retry: bool,
) -> Result<EventDisposition> {
    match enrollments::get(conn, &event.course_key, &event.subject_id, &event.role)? {
        Some(stored) => {
            if event.marker < stored.marker {
                debug!(
                    course_key = %event.course_key,
                    subject_id = %event.subject_id,
                    role = %event.role,
                    "stale event dropped"
                );
                return Ok(EventDisposition::Stale);
            }

            if stored.is_claimed() {
                enrollments::set_priority(conn, stored.id, Priority::High)?;
                info!(
                    course_key = %event.course_key,
                    subject_id = %event.subject_id,
                    queue_id = stored.queue_id,
                    "row in flight, deferred to next batch"
                );
                return Ok(EventDisposition::Deferred);
            }

            enrollments::update_from_event(conn, stored.id, event, Priority::Default)?;
            info!(
                course_key = %event.course_key,
                subject_id = %event.subject_id,
                role = %event.role,
                status = event.status.as_str(),
                "enrollment updated"
            );
            Ok(EventDisposition::Updated)
        }
        None => match enrollments::insert(conn, event) {
            Ok(()) => {
                info!(
                    course_key = %event.course_key,
                    subject_id = %event.subject_id,
                    role = %event.role,
                    status = event.status.as_str(),
                    "enrollment added"
                );
                Ok(EventDisposition::Inserted)
            }
            Err(SyncError::Conflict { .. }) if retry => apply_row(conn, event, false),
            Err(err) => Err(err),
        },
    }
}

fn escalate_course(conn: &Connection, hook: &dyn FastTrackHook, course_key: &str) -> Result<()> {
    if courses::raise_priority(conn, course_key, Priority::High)? {
        hook.course_priority_raised(conn, course_key, Priority::High)?;
    }
    Ok(())
}

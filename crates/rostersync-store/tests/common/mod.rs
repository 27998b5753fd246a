use chrono::{DateTime, TimeZone, Utc};

use rostersync_core::directory::Person;
use rostersync_core::model::{EnrollmentEvent, EnrollmentStatus, Priority, SequenceMarker};
use rostersync_store::Ledger;

/// Create a fresh in-memory ledger for testing
#[allow(dead_code)]
pub fn new_ledger() -> Ledger {
    Ledger::open_in_memory().unwrap()
}

/// Timestamp helper: seconds offset into a fixed test epoch
#[allow(dead_code)]
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
}

/// A test person with a derived subject id
#[allow(dead_code)]
pub fn person(login: &str) -> Person {
    let mut subject = format!("{:X<32}", login.to_ascii_uppercase().replace('-', ""));
    subject.truncate(32);
    Person {
        subject_id: subject,
        login_id: login.to_string(),
        first_name: "Test".to_string(),
        last_name: login.to_string(),
        email: Some(format!("{}@example.edu", login)),
    }
}

/// An enrollment event for an active term
#[allow(dead_code)]
pub fn event(
    course_key: &str,
    subject_id: &str,
    role: &str,
    status: EnrollmentStatus,
    tiebreak: i64,
    at_secs: i64,
) -> EnrollmentEvent {
    EnrollmentEvent {
        course_key: course_key.to_string(),
        term_key: "2026-spring".to_string(),
        subject_id: subject_id.to_string(),
        role: role.to_string(),
        status,
        marker: SequenceMarker::new(tiebreak, ts(at_secs)),
        primary_course_key: None,
        instructor_subject_id: None,
        term_active: true,
    }
}

/// Seed a provisioned course so events against it sequence normally
#[allow(dead_code)]
pub fn provisioned_course(ledger: &mut Ledger, course_key: &str) {
    ledger
        .add_course(course_key, "2026-spring", None, Priority::Default)
        .unwrap();
    ledger
        .connection()
        .execute(
            "UPDATE courses SET provisioned_at = 1760000000 WHERE course_key = ?1",
            [course_key],
        )
        .unwrap();
}

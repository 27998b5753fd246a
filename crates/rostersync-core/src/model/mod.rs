//! Ledger record models
//!
//! Plain data carried between the store and the engine. The store owns all
//! persistence; these types never talk to the database themselves.

mod admin;
mod batch;
mod course;
mod enrollment;
mod group;
mod priority;
mod user;

pub use admin::AdminRecord;
pub use batch::{Batch, BatchOutcome};
pub use course::CourseRecord;
pub use enrollment::{EnrollmentEvent, EnrollmentRecord, EnrollmentStatus, SequenceMarker};
pub use group::{GroupRecord, LoginKind, SectionMemberRecord};
pub use priority::{Priority, RecordKind};
pub use user::UserRecord;

//! Payload assembly
//!
//! Typed row formats plus the deduplicating collector that writes them out
//! as one delimited file per kind.

mod collector;
mod format;

pub use collector::Collector;
pub use format::{
    encode_line, AccountRow, AdminRow, CourseRow, EnrollmentRow, Row, SectionRow, TermRow,
    UserRow, XlistRow, STATUS_ACTIVE, STATUS_DELETED,
};

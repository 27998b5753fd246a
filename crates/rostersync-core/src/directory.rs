//! Collaborator interfaces
//!
//! The engine talks to three external systems: the student-records directory
//! (sections, registrations, persons), the groups directory (membership), and
//! the downstream consumer (import submission and enrollment lookup). Only
//! these trait surfaces are part of the core; concrete clients live with the
//! deployment, and tests substitute in-memory fakes.

use std::path::Path;

use chrono::NaiveDate;

use crate::errors::Result;
use crate::model::EnrollmentStatus;

/// A person known to the student-records directory
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    /// Directory subject id, the stable cross-system identifier
    pub subject_id: String,
    /// Institutional login id, or the full external identity for
    /// federated accounts
    pub login_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

impl Person {
    /// Display name: "First Last", or whichever part exists
    pub fn full_name(&self) -> String {
        if !self.first_name.is_empty() && !self.last_name.is_empty() {
            format!("{} {}", self.first_name, self.last_name)
        } else if !self.first_name.is_empty() {
            self.first_name.clone()
        } else {
            self.last_name.clone()
        }
    }

    /// Sort key: "Last, First", or whichever part exists
    pub fn sortable_name(&self) -> String {
        if !self.first_name.is_empty() && !self.last_name.is_empty() {
            format!("{}, {}", self.last_name, self.first_name)
        } else {
            self.full_name()
        }
    }
}

/// Term descriptor embedded in a section lookup
#[derive(Debug, Clone, PartialEq)]
pub struct TermDescriptor {
    pub term_key: String,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// One student registration in a section
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub person: Person,
    pub status: EnrollmentStatus,
    /// Instructor the registration belongs to, for sections whose roster
    /// splits per instructor
    pub instructor_subject_id: Option<String>,
}

/// Full section descriptor returned by the student-records directory
#[derive(Debug, Clone, PartialEq)]
pub struct SectionDescriptor {
    /// Natural key of this section ("<term>-<curric>-<number>-<letter>")
    pub section_key: String,
    /// Key of the downstream course container this section belongs to;
    /// equals `section_key` for primary sections
    pub course_key: String,
    pub term: TermDescriptor,
    /// Short display title
    pub title: String,
    /// Long display title
    pub long_title: String,
    /// Downstream account the course files under
    pub account_key: String,
    pub is_primary: bool,
    pub is_independent_study: bool,
    /// When set, independent-study expansion is restricted to this instructor
    pub independent_study_instructor: Option<String>,
    pub is_withdrawn: bool,
    /// Whether the section should be exported as active
    pub is_active: bool,
    /// Downstream-ownership flag; owned sections win canonical
    /// cross-list selection
    pub lms_owned: bool,
    pub instructors: Vec<Person>,
    /// Natural keys of linked (secondary) sections under this primary
    pub linked_section_keys: Vec<String>,
    /// Natural keys of jointly-offered sections
    pub joint_section_keys: Vec<String>,
}

impl SectionDescriptor {
    /// Payload status string for course and section rows
    pub fn status_str(&self) -> &'static str {
        if self.is_active {
            "active"
        } else {
            "deleted"
        }
    }
}

/// Student-records directory: section, registration, and person lookup
///
/// All calls are synchronous and blocking; the engine makes them sequentially
/// per claimed record within one resolution pass.
pub trait StudentDirectory {
    /// Fetch a section descriptor by natural key
    fn get_section(&self, section_key: &str) -> Result<SectionDescriptor>;

    /// Fetch the active registrations for a section
    fn registrations(&self, section: &SectionDescriptor) -> Result<Vec<Registration>>;

    /// Resolve an institutional login id to a person
    fn person_by_login(&self, login: &str) -> Result<Person>;

    /// Resolve a federated external identity to a person
    fn person_by_external(&self, login: &str) -> Result<Person>;
}

/// How one direct group member resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryMemberKind {
    Login,
    External,
    Group,
}

/// One direct member of a group, before flattening
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryMember {
    pub name: String,
    pub kind: DirectoryMemberKind,
}

/// Groups directory: direct membership lookup
///
/// Returns direct members only; the reconciler flattens nested groups itself
/// so it can cache and cycle-guard the traversal.
pub trait GroupDirectory {
    /// Fetch the direct members of a group, acting as the given identity
    fn members(&self, group_key: &str, act_as: Option<&str>) -> Result<Vec<DirectoryMember>>;
}

/// Submission handle returned by the downstream consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    pub state: String,
}

/// Downstream import status as reported by a poll
#[derive(Debug, Clone, PartialEq)]
pub struct ImportStatus {
    pub state: String,
    pub progress: i64,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ImportStatus {
    /// True once the import reached a terminal imported state
    pub fn is_imported(&self) -> bool {
        self.progress >= 100 && self.state.starts_with("imported")
    }

    /// True for a terminal import with no recorded issues
    pub fn is_clean(&self) -> bool {
        self.is_imported() && self.warnings.is_empty() && self.errors.is_empty()
    }

    /// True once the downstream has given up on the import
    pub fn is_failed(&self) -> bool {
        self.state.starts_with("failed")
    }

    /// True while the import is still being processed downstream
    pub fn is_pending(&self) -> bool {
        !self.is_imported() && !self.is_failed()
    }
}

/// One current enrollment as known to the downstream consumer
#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamEnrollment {
    pub login: String,
    pub role: String,
    /// Section the enrollment lives in; distinguishes academic sections
    /// from the synthetic group section
    pub section_key: String,
}

/// Downstream consumer: import submission, status, and enrollment lookup
pub trait Downstream {
    /// Submit a payload directory for import
    fn submit(&self, path: &Path) -> Result<Submission>;

    /// Fetch the status of a previously submitted import
    fn status(&self, submission_id: &str) -> Result<ImportStatus>;

    /// Fetch the current enrollments of a course, all sections
    fn section_enrollments(&self, course_key: &str) -> Result<Vec<DownstreamEnrollment>>;

    /// Whether a section exists downstream
    fn has_section(&self, section_key: &str) -> Result<bool>;
}

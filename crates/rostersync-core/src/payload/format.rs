//! Delimited row formats
//!
//! Each row kind is a plain struct exposing an ordered field list; one shared
//! encoder turns a field list into a delimited line. Optional fields
//! serialize as empty strings, never a null token.

use chrono::NaiveDate;

use crate::directory::{Person, Registration, SectionDescriptor, TermDescriptor};
use crate::errors::{Result, SyncError};
use crate::model::EnrollmentStatus;

/// Row status for active entities
pub const STATUS_ACTIVE: &str = "active";
/// Row status for deleted entities
pub const STATUS_DELETED: &str = "deleted";

/// Encode one line of comma-delimited data
///
/// Fields containing the delimiter, quotes, or line breaks are quoted, with
/// embedded quotes doubled. The line is terminated with a bare newline.
pub fn encode_line(fields: &[String]) -> String {
    let mut line = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
        {
            line.push('"');
            line.push_str(&field.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(field);
        }
    }
    line.push('\n');
    line
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn opt_date(value: &Option<NaiveDate>) -> String {
    value.map(|d| d.to_string()).unwrap_or_default()
}

/// account_id, parent_account_id, name, status
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRow {
    pub account_key: String,
    pub parent_account_key: Option<String>,
    pub name: String,
    pub status: String,
}

impl AccountRow {
    pub const HEADER: &'static [&'static str] =
        &["account_id", "parent_account_id", "name", "status"];

    pub fn key(&self) -> &str {
        &self.account_key
    }

    pub fn fields(&self) -> Vec<String> {
        vec![
            self.account_key.clone(),
            opt(&self.parent_account_key),
            self.name.clone(),
            self.status.clone(),
        ]
    }
}

/// user_id, integration_id, login_id, full_name, sortable_name, short_name,
/// email, status
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub subject_id: String,
    pub login_id: String,
    pub full_name: String,
    pub sortable_name: String,
    pub email: Option<String>,
    pub status: String,
}

impl UserRow {
    pub const HEADER: &'static [&'static str] = &[
        "user_id",
        "integration_id",
        "login_id",
        "full_name",
        "sortable_name",
        "short_name",
        "email",
        "status",
    ];

    pub fn from_person(person: &Person, status: &str) -> Self {
        Self {
            subject_id: person.subject_id.clone(),
            login_id: person.login_id.clone(),
            full_name: person.full_name(),
            sortable_name: person.sortable_name(),
            email: person.email.clone(),
            status: status.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.subject_id
    }

    pub fn fields(&self) -> Vec<String> {
        vec![
            self.subject_id.clone(),
            String::new(),
            self.login_id.clone(),
            self.full_name.clone(),
            self.sortable_name.clone(),
            self.full_name.clone(),
            opt(&self.email),
            self.status.clone(),
        ]
    }
}

/// user_id, account_id, role, status
#[derive(Debug, Clone, PartialEq)]
pub struct AdminRow {
    pub subject_id: String,
    pub account_key: String,
    pub role: String,
    pub status: String,
}

impl AdminRow {
    pub const HEADER: &'static [&'static str] = &["user_id", "account_id", "role", "status"];

    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.subject_id, self.account_key, self.role)
    }

    pub fn fields(&self) -> Vec<String> {
        vec![
            self.subject_id.clone(),
            self.account_key.clone(),
            self.role.clone(),
            self.status.clone(),
        ]
    }
}

/// term_id, name, status, start_date, end_date
#[derive(Debug, Clone, PartialEq)]
pub struct TermRow {
    pub term_key: String,
    pub name: String,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl TermRow {
    pub const HEADER: &'static [&'static str] =
        &["term_id", "name", "status", "start_date", "end_date"];

    pub fn from_term(term: &TermDescriptor) -> Self {
        Self {
            term_key: term.term_key.clone(),
            name: term.name.clone(),
            status: STATUS_ACTIVE.to_string(),
            start_date: term.start_date,
            end_date: term.end_date,
        }
    }

    pub fn key(&self) -> &str {
        &self.term_key
    }

    pub fn fields(&self) -> Vec<String> {
        vec![
            self.term_key.clone(),
            self.name.clone(),
            self.status.clone(),
            opt_date(&self.start_date),
            opt_date(&self.end_date),
        ]
    }
}

/// course_id, short_name, long_name, account_id, term_id, status,
/// start_date, end_date
#[derive(Debug, Clone, PartialEq)]
pub struct CourseRow {
    pub course_key: String,
    pub short_name: String,
    pub long_name: String,
    pub account_key: String,
    pub term_key: String,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl CourseRow {
    pub const HEADER: &'static [&'static str] = &[
        "course_id",
        "short_name",
        "long_name",
        "account_id",
        "term_id",
        "status",
        "start_date",
        "end_date",
    ];

    pub fn from_section(section: &SectionDescriptor) -> Self {
        Self {
            course_key: section.course_key.clone(),
            short_name: section.title.clone(),
            long_name: section.long_title.clone(),
            account_key: section.account_key.clone(),
            term_key: section.term.term_key.clone(),
            status: section.status_str().to_string(),
            start_date: None,
            end_date: section.term.end_date,
        }
    }

    /// One independent-study course per instructor, keyed under the
    /// instructor's subject id
    pub fn independent_study(section: &SectionDescriptor, instructor: &Person) -> Self {
        let mut row = Self::from_section(section);
        row.course_key = format!("{}-{}", section.course_key, instructor.subject_id);
        row.long_name = format!("{} ({})", section.long_title, instructor.full_name());
        row
    }

    pub fn key(&self) -> &str {
        &self.course_key
    }

    pub fn fields(&self) -> Vec<String> {
        vec![
            self.course_key.clone(),
            self.short_name.clone(),
            self.long_name.clone(),
            self.account_key.clone(),
            self.term_key.clone(),
            self.status.clone(),
            opt_date(&self.start_date),
            opt_date(&self.end_date),
        ]
    }
}

/// section_id, course_id, name, status, start_date, end_date
#[derive(Debug, Clone, PartialEq)]
pub struct SectionRow {
    pub section_key: String,
    pub course_key: String,
    pub name: String,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl SectionRow {
    pub const HEADER: &'static [&'static str] = &[
        "section_id",
        "course_id",
        "name",
        "status",
        "start_date",
        "end_date",
    ];

    pub fn from_section(section: &SectionDescriptor) -> Self {
        Self {
            section_key: section.section_key.clone(),
            course_key: section.course_key.clone(),
            name: section.title.clone(),
            status: section.status_str().to_string(),
            start_date: None,
            end_date: None,
        }
    }

    /// Explicitly keyed section row, used for placeholder and synthetic
    /// group sections
    pub fn new(section_key: &str, course_key: &str, name: &str, status: &str) -> Self {
        Self {
            section_key: section_key.to_string(),
            course_key: course_key.to_string(),
            name: name.to_string(),
            status: status.to_string(),
            start_date: None,
            end_date: None,
        }
    }

    /// Independent-study section, keyed under the instructor's subject id
    pub fn independent_study(section: &SectionDescriptor, instructor: &Person) -> Self {
        let mut row = Self::from_section(section);
        row.section_key = format!("{}-{}", section.section_key, instructor.subject_id);
        row.course_key = format!("{}-{}", section.course_key, instructor.subject_id);
        row
    }

    pub fn key(&self) -> &str {
        &self.section_key
    }

    pub fn fields(&self) -> Vec<String> {
        vec![
            self.section_key.clone(),
            self.course_key.clone(),
            self.name.clone(),
            self.status.clone(),
            opt_date(&self.start_date),
            opt_date(&self.end_date),
        ]
    }
}

/// course_id, root_account, user_id, role, role_id, section_id, status,
/// associated_user_id
///
/// Either a course key or a section key must be present; constructors
/// enforce this along with role and status validity.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRow {
    pub course_key: Option<String>,
    pub subject_id: String,
    pub role: String,
    pub section_key: Option<String>,
    pub status: String,
    pub associated_subject_id: Option<String>,
}

impl EnrollmentRow {
    pub const HEADER: &'static [&'static str] = &[
        "course_id",
        "root_account",
        "user_id",
        "role",
        "role_id",
        "section_id",
        "status",
        "associated_user_id",
    ];

    fn build(
        course_key: Option<String>,
        section_key: Option<String>,
        subject_id: &str,
        role: &str,
        status: &str,
    ) -> Result<Self> {
        if course_key.is_none() && section_key.is_none() {
            return Err(SyncError::policy(format!(
                "missing course and section for {}",
                subject_id
            )));
        }
        if role.is_empty() {
            return Err(SyncError::policy(format!(
                "missing role for {}",
                subject_id
            )));
        }
        EnrollmentStatus::parse(status)?;

        Ok(Self {
            course_key,
            subject_id: subject_id.to_string(),
            role: role.to_string(),
            section_key,
            status: status.to_string(),
            associated_subject_id: None,
        })
    }

    pub fn for_instructor(section_key: &str, person: &Person, status: &str) -> Result<Self> {
        Self::build(
            None,
            Some(section_key.to_string()),
            &person.subject_id,
            "teacher",
            status,
        )
    }

    pub fn for_registration(section_key: &str, registration: &Registration) -> Result<Self> {
        Self::build(
            None,
            Some(section_key.to_string()),
            &registration.person.subject_id,
            "student",
            registration.status.as_str(),
        )
    }

    pub fn for_member(section_key: &str, person: &Person, role: &str, status: &str) -> Result<Self> {
        Self::build(
            None,
            Some(section_key.to_string()),
            &person.subject_id,
            role,
            status,
        )
    }

    /// Event-sourced enrollment against a course container, where only the
    /// subject id is known
    pub fn for_subject(
        course_key: &str,
        subject_id: &str,
        role: &str,
        status: &str,
    ) -> Result<Self> {
        Self::build(Some(course_key.to_string()), None, subject_id, role, status)
    }

    pub fn fields(&self) -> Vec<String> {
        vec![
            opt(&self.course_key),
            String::new(),
            self.subject_id.clone(),
            self.role.clone(),
            String::new(),
            opt(&self.section_key),
            self.status.clone(),
            opt(&self.associated_subject_id),
        ]
    }
}

/// xlist_course_id, section_id, status
#[derive(Debug, Clone, PartialEq)]
pub struct XlistRow {
    pub xlist_course_key: String,
    pub section_key: String,
    pub status: String,
}

impl XlistRow {
    pub const HEADER: &'static [&'static str] = &["xlist_course_id", "section_id", "status"];

    pub fn new(xlist_course_key: &str, section_key: &str, status: &str) -> Self {
        Self {
            xlist_course_key: xlist_course_key.to_string(),
            section_key: section_key.to_string(),
            status: status.to_string(),
        }
    }

    pub fn fields(&self) -> Vec<String> {
        vec![
            self.xlist_course_key.clone(),
            self.section_key.clone(),
            self.status.clone(),
        ]
    }
}

/// Closed set of payload row kinds routed through the collector
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Account(AccountRow),
    User(UserRow),
    Admin(AdminRow),
    Term(TermRow),
    Course(CourseRow),
    Section(SectionRow),
    Enrollment(EnrollmentRow),
    Xlist(XlistRow),
}

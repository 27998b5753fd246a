// Shared across the engine test binaries; each uses only a subset
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use rostersync_core::directory::{
    DirectoryMember, DirectoryMemberKind, Downstream, DownstreamEnrollment, GroupDirectory,
    ImportStatus, Person, Registration, SectionDescriptor, StudentDirectory, Submission,
    TermDescriptor,
};
use rostersync_core::model::EnrollmentStatus;
use rostersync_core::{Result, SyncConfig, SyncError};
use rostersync_store::Ledger;

/// Create a fresh in-memory ledger for testing
#[allow(dead_code)]
pub fn new_ledger() -> Ledger {
    Ledger::open_in_memory().unwrap()
}

/// A config writing payloads under the given scratch root
#[allow(dead_code)]
pub fn config(root: &Path) -> SyncConfig {
    SyncConfig {
        payload_root: root.join("payloads"),
        ..SyncConfig::default()
    }
}

/// A test person with a policy-valid hex subject id derived from the login
#[allow(dead_code)]
pub fn person(login: &str) -> Person {
    let mut subject: String = login.bytes().map(|b| format!("{:02X}", b)).collect();
    while subject.len() < 32 {
        subject.push('0');
    }
    subject.truncate(32);
    Person {
        subject_id: subject,
        login_id: login.to_string(),
        first_name: "Test".to_string(),
        last_name: login.to_string(),
        email: Some(format!("{}@example.edu", login)),
    }
}

/// A primary, active section descriptor with no instructors or links
#[allow(dead_code)]
pub fn section(key: &str) -> SectionDescriptor {
    SectionDescriptor {
        section_key: key.to_string(),
        course_key: key.to_string(),
        term: TermDescriptor {
            term_key: "2026-spring".to_string(),
            name: "Spring 2026".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 3, 30),
            end_date: NaiveDate::from_ymd_opt(2026, 6, 12),
        },
        title: key.to_string(),
        long_title: format!("Course {}", key),
        account_key: "train".to_string(),
        is_primary: true,
        is_independent_study: false,
        independent_study_instructor: None,
        is_withdrawn: false,
        is_active: true,
        lms_owned: false,
        instructors: vec![],
        linked_section_keys: vec![],
        joint_section_keys: vec![],
    }
}

/// Data rows (header stripped) of one payload file
#[allow(dead_code)]
pub fn payload_lines(path: &Path, name: &str) -> Vec<String> {
    std::fs::read_to_string(path.join(name))
        .unwrap()
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

// ===== STUDENT DIRECTORY FAKE =====

#[derive(Default)]
pub struct FakeDirectory {
    sections: RefCell<HashMap<String, SectionDescriptor>>,
    rosters: RefCell<HashMap<String, Vec<Registration>>>,
    persons: RefCell<HashMap<String, Person>>,
    pub unreachable: RefCell<HashSet<String>>,
}

#[allow(dead_code)]
impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_section(&self, section: SectionDescriptor) {
        for instructor in &section.instructors {
            self.add_person(instructor.clone());
        }
        self.sections
            .borrow_mut()
            .insert(section.section_key.clone(), section);
    }

    pub fn add_person(&self, person: Person) {
        self.persons
            .borrow_mut()
            .insert(person.login_id.clone(), person);
    }

    pub fn add_registration(&self, section_key: &str, person: Person, instructor: Option<&str>) {
        self.add_person(person.clone());
        self.rosters
            .borrow_mut()
            .entry(section_key.to_string())
            .or_default()
            .push(Registration {
                person,
                status: EnrollmentStatus::Active,
                instructor_subject_id: instructor.map(str::to_string),
            });
    }

    /// Make a section key fail with a transient transport error
    pub fn break_section(&self, section_key: &str) {
        self.unreachable.borrow_mut().insert(section_key.to_string());
    }
}

impl StudentDirectory for FakeDirectory {
    fn get_section(&self, section_key: &str) -> Result<SectionDescriptor> {
        if self.unreachable.borrow().contains(section_key) {
            return Err(SyncError::transient("get_section", "connection reset"));
        }
        self.sections
            .borrow()
            .get(section_key)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("section {}", section_key)))
    }

    fn registrations(&self, section: &SectionDescriptor) -> Result<Vec<Registration>> {
        Ok(self
            .rosters
            .borrow()
            .get(&section.section_key)
            .cloned()
            .unwrap_or_default())
    }

    fn person_by_login(&self, login: &str) -> Result<Person> {
        if self.unreachable.borrow().contains(login) {
            return Err(SyncError::transient("person_by_login", "connection reset"));
        }
        self.persons
            .borrow()
            .get(login)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("person {}", login)))
    }

    fn person_by_external(&self, login: &str) -> Result<Person> {
        self.person_by_login(login)
    }
}

// ===== GROUP DIRECTORY FAKE =====

#[derive(Default)]
pub struct FakeGroups {
    members: RefCell<HashMap<String, Vec<DirectoryMember>>>,
    pub unreachable: RefCell<HashSet<String>>,
    /// (group_key, act_as) of every fetch, in call order
    pub calls: RefCell<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl FakeGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_members(&self, group_key: &str, members: Vec<DirectoryMember>) {
        self.members
            .borrow_mut()
            .insert(group_key.to_string(), members);
    }

    pub fn break_group(&self, group_key: &str) {
        self.unreachable.borrow_mut().insert(group_key.to_string());
    }
}

#[allow(dead_code)]
pub fn login_member(name: &str) -> DirectoryMember {
    DirectoryMember {
        name: name.to_string(),
        kind: DirectoryMemberKind::Login,
    }
}

#[allow(dead_code)]
pub fn group_member(name: &str) -> DirectoryMember {
    DirectoryMember {
        name: name.to_string(),
        kind: DirectoryMemberKind::Group,
    }
}

impl GroupDirectory for FakeGroups {
    fn members(&self, group_key: &str, act_as: Option<&str>) -> Result<Vec<DirectoryMember>> {
        self.calls
            .borrow_mut()
            .push((group_key.to_string(), act_as.unwrap_or("").to_string()));
        if self.unreachable.borrow().contains(group_key) {
            return Err(SyncError::transient("group_members", "timeout"));
        }
        self.members
            .borrow()
            .get(group_key)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("group {}", group_key)))
    }
}

// ===== DOWNSTREAM FAKE =====

#[derive(Default)]
pub struct FakeDownstream {
    enrollments: RefCell<HashMap<String, Vec<DownstreamEnrollment>>>,
    pub submitted: RefCell<Vec<PathBuf>>,
    statuses: RefCell<HashMap<String, ImportStatus>>,
    pub enrollments_unreachable: RefCell<bool>,
    pub submit_unreachable: RefCell<bool>,
    next_id: RefCell<i64>,
}

#[allow(dead_code)]
impl FakeDownstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_enrollment(&self, course_key: &str, login: &str, role: &str, section_key: &str) {
        self.enrollments
            .borrow_mut()
            .entry(course_key.to_string())
            .or_default()
            .push(DownstreamEnrollment {
                login: login.to_string(),
                role: role.to_string(),
                section_key: section_key.to_string(),
            });
    }

    pub fn set_status(&self, submission_id: &str, status: ImportStatus) {
        self.statuses
            .borrow_mut()
            .insert(submission_id.to_string(), status);
    }

    pub fn imported_clean() -> ImportStatus {
        ImportStatus {
            state: "imported".to_string(),
            progress: 100,
            warnings: vec![],
            errors: vec![],
        }
    }

    pub fn imported_with_warnings(warning: &str) -> ImportStatus {
        ImportStatus {
            state: "imported_with_messages".to_string(),
            progress: 100,
            warnings: vec![warning.to_string()],
            errors: vec![],
        }
    }

    pub fn failed(error: &str) -> ImportStatus {
        ImportStatus {
            state: "failed_with_messages".to_string(),
            progress: 100,
            warnings: vec![],
            errors: vec![error.to_string()],
        }
    }
}

impl Downstream for FakeDownstream {
    fn submit(&self, path: &Path) -> Result<Submission> {
        if *self.submit_unreachable.borrow() {
            return Err(SyncError::transient("submit", "503 service unavailable"));
        }
        let mut next = self.next_id.borrow_mut();
        *next += 1;
        let id = next.to_string();
        self.submitted.borrow_mut().push(path.to_path_buf());
        self.statuses.borrow_mut().insert(
            id.clone(),
            ImportStatus {
                state: "created".to_string(),
                progress: 0,
                warnings: vec![],
                errors: vec![],
            },
        );
        Ok(Submission {
            id,
            state: "created".to_string(),
        })
    }

    fn status(&self, submission_id: &str) -> Result<ImportStatus> {
        self.statuses
            .borrow()
            .get(submission_id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(format!("import {}", submission_id)))
    }

    fn section_enrollments(&self, course_key: &str) -> Result<Vec<DownstreamEnrollment>> {
        if *self.enrollments_unreachable.borrow() {
            return Err(SyncError::transient("section_enrollments", "timeout"));
        }
        Ok(self
            .enrollments
            .borrow()
            .get(course_key)
            .cloned()
            .unwrap_or_default())
    }

    fn has_section(&self, _section_key: &str) -> Result<bool> {
        Ok(true)
    }
}

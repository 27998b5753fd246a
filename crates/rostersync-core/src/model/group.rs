use chrono::{DateTime, Utc};

use super::priority::Priority;

/// A course-to-group binding: members of `group_key` get `role` in the
/// course's synthetic group section
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRecord {
    /// Ledger row id
    pub id: i64,
    pub course_key: String,
    pub group_key: String,
    pub role: String,
    /// Identity the binding was created by; group lookups act as this user
    pub added_by: String,
    pub added_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub queue_id: Option<i64>,
}

/// How a section member's login resolves in the student directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginKind {
    /// Institutional login id
    Login,
    /// Federated external identity (eppn-style)
    External,
}

impl LoginKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LoginKind::Login => "login",
            LoginKind::External => "external",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "login" => Some(LoginKind::Login),
            "external" => Some(LoginKind::External),
            _ => None,
        }
    }
}

/// Cached downstream membership of a course's synthetic group section
///
/// The reconciler diffs the flattened external membership against these rows;
/// rows are tombstoned rather than removed so a vanished-then-restored member
/// round-trips without churn.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionMemberRecord {
    /// Ledger row id; 0 for rows built in-memory during a pass
    pub id: i64,
    pub course_key: String,
    pub login: String,
    pub login_kind: LoginKind,
    pub role: String,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub queue_id: Option<i64>,
}

impl SectionMemberRecord {
    /// Build an in-memory row for the current reconciliation pass
    pub fn current(
        course_key: impl Into<String>,
        login: impl Into<String>,
        login_kind: LoginKind,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            course_key: course_key.into(),
            login: login.into(),
            login_kind,
            role: role.into(),
            is_deleted: false,
            deleted_at: None,
            priority: Priority::None,
            queue_id: None,
        }
    }

    /// Membership identity comparison: course, login, kind, and role,
    /// case-insensitive on login and role
    pub fn same_member(&self, other: &SectionMemberRecord) -> bool {
        self.course_key == other.course_key
            && self.login.eq_ignore_ascii_case(&other.login)
            && self.login_kind == other.login_kind
            && self.role.eq_ignore_ascii_case(&other.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_member_is_case_insensitive() {
        let a = SectionMemberRecord::current("c1", "JDoe", LoginKind::Login, "TA");
        let b = SectionMemberRecord::current("c1", "jdoe", LoginKind::Login, "ta");
        assert!(a.same_member(&b));
    }

    #[test]
    fn test_same_member_distinguishes_kind() {
        let a = SectionMemberRecord::current("c1", "jdoe", LoginKind::Login, "ta");
        let b = SectionMemberRecord::current("c1", "jdoe", LoginKind::External, "ta");
        assert!(!a.same_member(&b));
    }

    #[test]
    fn test_login_kind_round_trip() {
        assert_eq!(LoginKind::parse("login"), Some(LoginKind::Login));
        assert_eq!(LoginKind::parse("external"), Some(LoginKind::External));
        assert_eq!(LoginKind::parse("group"), None);
    }
}

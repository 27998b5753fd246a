use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};

/// Queue priority for a ledger record
///
/// Records are claimed per priority tier; completing a batch steps the
/// priority of its records back down toward `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Not eligible for export; retained for history until purged
    None,
    /// Normal queue position
    Default,
    /// Fast-tracked ahead of the default tier
    High,
    /// Fast-tracked and eligible for synchronous provisioning
    Immediate,
}

impl Priority {
    /// Integer form stored in the ledger
    pub fn as_i64(self) -> i64 {
        match self {
            Priority::None => 0,
            Priority::Default => 1,
            Priority::High => 2,
            Priority::Immediate => 3,
        }
    }

    /// Parse the integer form stored in the ledger
    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Priority::None),
            1 => Ok(Priority::Default),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Immediate),
            other => Err(SyncError::Internal {
                detail: format!("invalid priority value: {}", other),
            }),
        }
    }

    /// Human-readable label used in logs and status payloads
    pub fn label(self) -> &'static str {
        match self {
            Priority::None => "none",
            Priority::Default => "normal",
            Priority::High => "high",
            Priority::Immediate => "immediate",
        }
    }
}

/// Closed set of ledger record kinds
///
/// Kind-specific queue behavior is dispatched statically through this enum;
/// there is exactly one claim/dequeue implementation per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Course,
    User,
    Enrollment,
    Group,
    Admin,
}

impl RecordKind {
    /// Stable string form stored on batches
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Course => "course",
            RecordKind::User => "user",
            RecordKind::Enrollment => "enrollment",
            RecordKind::Group => "group",
            RecordKind::Admin => "admin",
        }
    }

    /// Parse the stable string form
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "course" => Ok(RecordKind::Course),
            "user" => Ok(RecordKind::User),
            "enrollment" => Ok(RecordKind::Enrollment),
            "group" => Ok(RecordKind::Group),
            "admin" => Ok(RecordKind::Admin),
            other => Err(SyncError::Internal {
                detail: format!("invalid record kind: {}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_round_trip() {
        for p in [
            Priority::None,
            Priority::Default,
            Priority::High,
            Priority::Immediate,
        ] {
            assert_eq!(Priority::from_i64(p.as_i64()).unwrap(), p);
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Immediate > Priority::High);
        assert!(Priority::High > Priority::Default);
        assert!(Priority::Default > Priority::None);
    }

    #[test]
    fn test_priority_values_are_dense() {
        // Batch completion steps a priority one level down by decrementing
        // the stored integer; the encoding must stay gapless
        assert_eq!(
            [
                Priority::None.as_i64(),
                Priority::Default.as_i64(),
                Priority::High.as_i64(),
                Priority::Immediate.as_i64(),
            ],
            [0, 1, 2, 3]
        );
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            RecordKind::Course,
            RecordKind::User,
            RecordKind::Enrollment,
            RecordKind::Group,
            RecordKind::Admin,
        ] {
            assert_eq!(RecordKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(RecordKind::parse("term").is_err());
    }
}

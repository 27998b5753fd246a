//! Runtime configuration
//!
//! Loaded from a TOML file; every field has a serde default so a partial
//! config (or none at all) still yields a working engine.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{Result, SyncError};
use crate::model::{Priority, RecordKind};

/// Claim limits for one record kind, split by priority tier
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitTier {
    pub default: i64,
    pub high: i64,
}

impl Default for LimitTier {
    fn default() -> Self {
        Self {
            default: 200,
            high: 500,
        }
    }
}

/// Per-kind claim limits
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClaimLimits {
    pub course: LimitTier,
    pub user: LimitTier,
    pub enrollment: LimitTier,
    pub group: LimitTier,
    pub admin: LimitTier,
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory payload directories are created under
    pub payload_root: PathBuf,

    /// Whether course resolution emits student registrations
    pub include_registrations: bool,

    /// Days an idle (priority none) enrollment event is retained
    pub retention_days: i64,

    /// Payload directory name collisions tolerated before failing loudly
    pub dir_collision_bound: u32,

    /// Group-key prefixes refused by policy
    pub disallowed_group_prefixes: Vec<String>,

    /// Per-kind claim limits
    pub limits: ClaimLimits,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            payload_root: PathBuf::from("payloads"),
            include_registrations: true,
            retention_days: 180,
            dir_collision_bound: 100,
            disallowed_group_prefixes: Vec::new(),
            limits: ClaimLimits::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|e| SyncError::io("read_config", e))?;
        toml::from_str(&text).map_err(|e| SyncError::Serialization {
            detail: format!("config parse failure: {}", e),
        })
    }

    /// Claim limit for a kind at a priority tier
    pub fn limit_for(&self, kind: RecordKind, priority: Priority) -> i64 {
        let tier = match kind {
            RecordKind::Course => &self.limits.course,
            RecordKind::User => &self.limits.user,
            RecordKind::Enrollment => &self.limits.enrollment,
            RecordKind::Group => &self.limits.group,
            RecordKind::Admin => &self.limits.admin,
        };
        if priority > Priority::Default {
            tier.high
        } else {
            tier.default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.retention_days, 180);
        assert_eq!(config.dir_collision_bound, 100);
        assert!(config.include_registrations);
    }

    #[test]
    fn test_limit_for_tiers() {
        let config = SyncConfig::default();
        assert_eq!(
            config.limit_for(RecordKind::Course, Priority::Default),
            config.limits.course.default
        );
        assert_eq!(
            config.limit_for(RecordKind::Course, Priority::High),
            config.limits.course.high
        );
        assert_eq!(
            config.limit_for(RecordKind::Course, Priority::Immediate),
            config.limits.course.high
        );
    }

    #[test]
    fn test_partial_toml() {
        let config: SyncConfig = toml::from_str(
            r#"
            payload_root = "/srv/rostersync/payloads"
            [limits.course]
            default = 50
            "#,
        )
        .unwrap();
        assert_eq!(
            config.payload_root,
            PathBuf::from("/srv/rostersync/payloads")
        );
        assert_eq!(config.limits.course.default, 50);
        assert_eq!(config.limits.course.high, 500);
        assert_eq!(config.retention_days, 180);
    }
}

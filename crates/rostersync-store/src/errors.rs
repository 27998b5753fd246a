//! Error helpers for rostersync-store
//!
//! Maps rusqlite failures into the shared SyncError taxonomy

use rostersync_core::errors::SyncError;

/// Result type alias using SyncError
pub type Result<T> = rostersync_core::errors::Result<T>;

/// Create a persistence error from rusqlite::Error
///
/// Uniqueness collisions map to `Conflict` so row-level retry logic can
/// distinguish them from real database trouble.
pub fn from_rusqlite(op: &str, err: rusqlite::Error) -> SyncError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &err {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation {
            return SyncError::Conflict {
                entity: op.to_string(),
                key: err.to_string(),
            };
        }
    }
    SyncError::persistence(op, err.to_string())
}

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> SyncError {
    SyncError::persistence(
        "migration",
        format!("Migration {} failed: {}", migration_id, reason),
    )
}

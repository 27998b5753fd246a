//! Payload collector
//!
//! Accumulates typed rows per export pass and writes them out as one
//! delimited file per kind. Dedup buckets are keyed by natural key; the two
//! event-shaped buckets (enrollments, cross-list rows) are append-only.
//!
//! Files are staged in a hidden directory and renamed into place, so a
//! consumer scanning the payload root never observes a partial payload.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::debug;
use uuid::Uuid;

use super::format::{
    encode_line, AccountRow, AdminRow, CourseRow, EnrollmentRow, Row, SectionRow, TermRow,
    UserRow, XlistRow,
};
use crate::errors::{Result, SyncError};

/// Directory permissions: owner/group read-write plus execute for traversal
const DIR_MODE: u32 = 0o771;
/// File permissions: owner/group read-write
const FILE_MODE: u32 = 0o660;

/// Per-pass accumulation of payload rows
///
/// Owned state is transient: a successful `write` drains every bucket.
#[derive(Debug, Default)]
pub struct Collector {
    accounts: BTreeMap<String, AccountRow>,
    users: BTreeMap<String, UserRow>,
    admins: BTreeMap<String, AdminRow>,
    terms: BTreeMap<String, TermRow>,
    courses: BTreeMap<String, CourseRow>,
    sections: BTreeMap<String, SectionRow>,
    enrollments: Vec<EnrollmentRow>,
    xlists: Vec<XlistRow>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a row into its bucket
    ///
    /// Returns whether the row's natural key was newly added. Account rows
    /// are first-write-wins; the other dedup buckets are last-write-wins but
    /// still report true only on the first sighting of a key. Enrollment and
    /// cross-list rows are append-only and always return true.
    pub fn add(&mut self, row: Row) -> bool {
        match row {
            Row::Account(r) => {
                if self.accounts.contains_key(r.key()) {
                    false
                } else {
                    self.accounts.insert(r.key().to_string(), r);
                    true
                }
            }
            Row::User(r) => self.users.insert(r.key().to_string(), r).is_none(),
            Row::Admin(r) => self.admins.insert(r.key(), r).is_none(),
            Row::Term(r) => self.terms.insert(r.key().to_string(), r).is_none(),
            Row::Course(r) => self.courses.insert(r.key().to_string(), r).is_none(),
            Row::Section(r) => self.sections.insert(r.key().to_string(), r).is_none(),
            Row::Enrollment(r) => {
                self.enrollments.push(r);
                true
            }
            Row::Xlist(r) => {
                self.xlists.push(r);
                true
            }
        }
    }

    /// True when no bucket holds any rows
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.users.is_empty()
            && self.admins.is_empty()
            && self.terms.is_empty()
            && self.courses.is_empty()
            && self.sections.is_empty()
            && self.enrollments.is_empty()
            && self.xlists.is_empty()
    }

    /// Write all non-empty buckets under a fresh payload directory
    ///
    /// Returns None without touching the filesystem when every bucket is
    /// empty. On success all buckets are drained and the payload directory
    /// path is returned. Dedup buckets are written sorted by key; append-only
    /// buckets in insertion order.
    pub fn write(&mut self, root: &Path, collision_bound: u32) -> Result<Option<PathBuf>> {
        if self.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(root).map_err(|e| SyncError::io("create_payload_root", e))?;

        let staging = root.join(format!(".staging-{}", Uuid::new_v4()));
        fs::create_dir(&staging).map_err(|e| SyncError::io("create_staging_dir", e))?;
        set_mode(&staging, DIR_MODE)?;

        let outcome = self.write_buckets(&staging).and_then(|_| {
            let path = promote(root, &staging, collision_bound)?;
            debug!(path = %path.display(), "payload written");
            Ok(path)
        });

        match outcome {
            Ok(path) => {
                self.clear();
                Ok(Some(path))
            }
            Err(err) => {
                // Best effort: do not leave staging litter behind on failure
                let _ = fs::remove_dir_all(&staging);
                Err(err)
            }
        }
    }

    fn write_buckets(&self, dir: &Path) -> Result<()> {
        if !self.accounts.is_empty() {
            let rows: Vec<Vec<String>> = self.accounts.values().map(|r| r.fields()).collect();
            write_file(dir, "accounts.csv", AccountRow::HEADER, &rows)?;
        }
        if !self.users.is_empty() {
            let rows: Vec<Vec<String>> = self.users.values().map(|r| r.fields()).collect();
            write_file(dir, "users.csv", UserRow::HEADER, &rows)?;
        }
        if !self.admins.is_empty() {
            let rows: Vec<Vec<String>> = self.admins.values().map(|r| r.fields()).collect();
            write_file(dir, "admins.csv", AdminRow::HEADER, &rows)?;
        }
        if !self.terms.is_empty() {
            let rows: Vec<Vec<String>> = self.terms.values().map(|r| r.fields()).collect();
            write_file(dir, "terms.csv", TermRow::HEADER, &rows)?;
        }
        if !self.courses.is_empty() {
            let rows: Vec<Vec<String>> = self.courses.values().map(|r| r.fields()).collect();
            write_file(dir, "courses.csv", CourseRow::HEADER, &rows)?;
        }
        if !self.sections.is_empty() {
            let rows: Vec<Vec<String>> = self.sections.values().map(|r| r.fields()).collect();
            write_file(dir, "sections.csv", SectionRow::HEADER, &rows)?;
        }
        if !self.enrollments.is_empty() {
            let rows: Vec<Vec<String>> = self.enrollments.iter().map(|r| r.fields()).collect();
            write_file(dir, "enrollments.csv", EnrollmentRow::HEADER, &rows)?;
        }
        if !self.xlists.is_empty() {
            let rows: Vec<Vec<String>> = self.xlists.iter().map(|r| r.fields()).collect();
            write_file(dir, "xlists.csv", XlistRow::HEADER, &rows)?;
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.accounts.clear();
        self.users.clear();
        self.admins.clear();
        self.terms.clear();
        self.courses.clear();
        self.sections.clear();
        self.enrollments.clear();
        self.xlists.clear();
    }
}

/// Serialize one bucket to a header+rows delimited file
fn write_file(dir: &Path, name: &str, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut content = String::new();
    let header_fields: Vec<String> = header.iter().map(|s| s.to_string()).collect();
    content.push_str(&encode_line(&header_fields));
    for row in rows {
        content.push_str(&encode_line(row));
    }

    let path = dir.join(name);
    fs::write(&path, content.as_bytes()).map_err(|e| SyncError::io("write_payload_file", e))?;
    set_mode(&path, FILE_MODE)?;
    Ok(())
}

/// Rename the staged directory to its timestamped final name
///
/// Collisions on the timestamp name get a numeric suffix, up to the bound;
/// exhausting the bound is a loud failure.
fn promote(root: &Path, staging: &Path, collision_bound: u32) -> Result<PathBuf> {
    let base = Local::now().format("%Y%m%d-%H%M%S").to_string();

    for collision in 0..collision_bound.max(1) {
        let candidate = if collision == 0 {
            root.join(&base)
        } else {
            root.join(format!("{}-{:03}", base, collision))
        };

        match fs::rename(staging, &candidate) {
            Ok(()) => return Ok(candidate),
            // ENOTEMPTY (39) when the target exists as a populated directory
            Err(e) if e.kind() == ErrorKind::AlreadyExists || e.raw_os_error() == Some(39) => {
                continue;
            }
            Err(e) => return Err(SyncError::io("promote_payload_dir", e)),
        }
    }

    Err(SyncError::io(
        "promote_payload_dir",
        std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("too many name collisions ({})", collision_bound),
        ),
    ))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| SyncError::io("set_permissions", e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::format::STATUS_ACTIVE;
    use tempfile::TempDir;

    fn account_row(key: &str) -> Row {
        Row::Account(AccountRow {
            account_key: key.to_string(),
            parent_account_key: None,
            name: format!("Account {}", key),
            status: STATUS_ACTIVE.to_string(),
        })
    }

    fn course_row(key: &str, short_name: &str) -> Row {
        Row::Course(CourseRow {
            course_key: key.to_string(),
            short_name: short_name.to_string(),
            long_name: format!("Long {}", short_name),
            account_key: "train".to_string(),
            term_key: "2026-spring".to_string(),
            status: STATUS_ACTIVE.to_string(),
            start_date: None,
            end_date: None,
        })
    }

    fn xlist_row(course: &str, section: &str) -> Row {
        Row::Xlist(XlistRow::new(course, section, STATUS_ACTIVE))
    }

    #[test]
    fn test_empty_write_is_noop() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("payloads");
        let mut collector = Collector::new();

        assert!(collector.write(&root, 100).unwrap().is_none());
        assert!(!root.exists());
    }

    #[test]
    fn test_dedup_add_returns_true_once() {
        let mut collector = Collector::new();
        assert!(collector.add(course_row("c1", "first")));
        assert!(!collector.add(course_row("c1", "second")));
        assert!(collector.add(course_row("c2", "other")));
    }

    #[test]
    fn test_dedup_last_write_wins_except_accounts() {
        let mut collector = Collector::new();
        collector.add(course_row("c1", "first"));
        collector.add(course_row("c1", "second"));
        assert_eq!(collector.courses["c1"].short_name, "second");

        assert!(collector.add(account_row("a1")));
        let original_name = collector.accounts["a1"].name.clone();
        assert!(!collector.add(Row::Account(AccountRow {
            account_key: "a1".to_string(),
            parent_account_key: None,
            name: "Renamed".to_string(),
            status: STATUS_ACTIVE.to_string(),
        })));
        assert_eq!(collector.accounts["a1"].name, original_name);
    }

    #[test]
    fn test_append_only_always_added() {
        let mut collector = Collector::new();
        assert!(collector.add(xlist_row("c1", "s1")));
        assert!(collector.add(xlist_row("c1", "s1")));
        assert_eq!(collector.xlists.len(), 2);
    }

    #[test]
    fn test_write_produces_sorted_files_and_clears() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("payloads");
        let mut collector = Collector::new();
        collector.add(course_row("b-course", "b"));
        collector.add(course_row("a-course", "a"));
        collector.add(xlist_row("a-course", "s1"));

        let path = collector.write(&root, 100).unwrap().unwrap();
        assert!(collector.is_empty());

        let courses = fs::read_to_string(path.join("courses.csv")).unwrap();
        let lines: Vec<&str> = courses.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("course_id,"));
        assert!(lines[1].starts_with("a-course,"));
        assert!(lines[2].starts_with("b-course,"));

        // Only non-empty buckets produce files
        assert!(!path.join("users.csv").exists());
        assert!(path.join("xlists.csv").exists());

        // No staging residue
        let residues: Vec<_> = fs::read_dir(&root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging"))
            .collect();
        assert!(residues.is_empty());
    }

    #[test]
    fn test_consecutive_writes_get_distinct_directories() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("payloads");
        let mut collector = Collector::new();

        collector.add(course_row("c1", "one"));
        let first = collector.write(&root, 100).unwrap().unwrap();

        collector.add(course_row("c2", "two"));
        let second = collector.write(&root, 100).unwrap().unwrap();

        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_payload_modes() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("payloads");
        let mut collector = Collector::new();
        collector.add(course_row("c1", "one"));

        let path = collector.write(&root, 100).unwrap().unwrap();
        let dir_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, DIR_MODE);
        let file_mode = fs::metadata(path.join("courses.csv"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, FILE_MODE);
    }
}

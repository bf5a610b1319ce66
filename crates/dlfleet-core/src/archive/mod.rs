//! Durable completion stores.
//!
//! - [`Archive`]: append-only set of completed item identifiers (idempotent
//!   resume at item granularity).
//! - [`FinishedLog`]: append-only list of finished job identifiers; a job in
//!   this log is never claimed again, including after a restart.
//!
//! Both load everything at startup and keep an in-memory set. A missing or
//! unreadable file is treated as empty; a failed append is logged and returned
//! to the caller, but the in-memory set is still updated.

mod finished;
mod lock;
mod record;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::ArchiveIoError;
use crate::sync;

pub use finished::FinishedLog;
pub use record::{identifier_from_line, ArchiveRecord, RecordStatus};

pub(crate) use lock::{append_line_locked, read_lines_locked};

/// Read a line file, treating "missing" as empty and any other failure as empty with a warning.
pub(crate) fn read_lines_lenient(path: &Path, what: &str) -> Vec<String> {
    match read_lines_locked(path) {
        Ok(lines) => lines,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), "{} unreadable, treating as empty: {}", what, e);
            Vec::new()
        }
    }
}

/// Set of completed item identifiers backed by an append-only file.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    ids: RwLock<HashSet<String>>,
}

impl Archive {
    /// Open the archive at `path`, loading every identifier already recorded.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids = Self::load_all(&path);
        tracing::debug!(path = %path.display(), items = ids.len(), "archive loaded");
        Self {
            path,
            ids: RwLock::new(ids),
        }
    }

    /// All identifiers recorded in the file at `path` (empty if missing/unreadable).
    pub fn load_all(path: &Path) -> HashSet<String> {
        read_lines_lenient(path, "archive")
            .iter()
            .filter_map(|line| identifier_from_line(line))
            .map(str::to_string)
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        sync::read(&self.ids).contains(id)
    }

    pub fn len(&self) -> usize {
        sync::read(&self.ids).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a completed item. Returns `Ok(false)` if it was already present.
    ///
    /// The in-memory set is updated before the file write, so a write failure
    /// never loses the completion for the rest of this run.
    pub fn append(&self, record: &ArchiveRecord) -> Result<bool, ArchiveIoError> {
        if !sync::write(&self.ids).insert(record.id.clone()) {
            return Ok(false);
        }
        append_line_locked(&self.path, &record.to_line()).map_err(|source| {
            tracing::warn!(path = %self.path.display(), item = %record.id, "archive append failed: {}", source);
            ArchiveIoError {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok(true)
    }

    /// Merge identifiers appended by other processes since the last load.
    pub fn refresh(&self) -> usize {
        let on_disk = Self::load_all(&self.path);
        let mut ids = sync::write(&self.ids);
        let before = ids.len();
        ids.extend(on_disk);
        ids.len() - before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn append_then_contains_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("archive.txt");
        let archive = Archive::open(&path);
        assert!(archive.is_empty());
        assert!(!archive.contains("https://a.test/1"));

        let rec = ArchiveRecord::new("https://a.test/1", RecordStatus::Completed);
        assert!(archive.append(&rec).unwrap());
        assert!(!archive.append(&rec).unwrap(), "second append is a no-op");
        assert!(archive.contains("https://a.test/1"));

        let reopened = Archive::open(&path);
        assert!(reopened.contains("https://a.test/1"));
        assert_eq!(reopened.len(), 1);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn missing_archive_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(dir.path().join("nope.txt"));
        assert!(!archive.contains("anything"));
        assert!(archive.is_empty());
    }

    #[test]
    fn corrupted_archive_does_not_raise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.txt");
        std::fs::write(&path, [0xff, 0xfe, b'\n', 0x00, 0xc3, b'\n']).unwrap();
        let archive = Archive::open(&path);
        assert!(!archive.contains("https://a.test/1"));
    }

    #[test]
    fn unreadable_archive_path_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file.
        let archive = Archive::open(dir.path());
        assert!(archive.is_empty());
    }

    #[test]
    fn write_failure_keeps_in_memory_completion() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(dir.path());
        let rec = ArchiveRecord::new("https://a.test/9", RecordStatus::Completed);
        assert!(archive.append(&rec).is_err());
        assert!(archive.contains("https://a.test/9"));
    }

    #[test]
    fn bare_identifier_lines_are_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.txt");
        std::fs::write(&path, "https://a.test/bare\n\n# comment\n").unwrap();
        let archive = Archive::open(&path);
        assert!(archive.contains("https://a.test/bare"));
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn refresh_picks_up_other_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.txt");
        let first = Archive::open(&path);
        let second = Archive::open(&path);
        second
            .append(&ArchiveRecord::new("https://a.test/x", RecordStatus::AlreadyExists))
            .unwrap();
        assert!(!first.contains("https://a.test/x"));
        assert_eq!(first.refresh(), 1);
        assert!(first.contains("https://a.test/x"));
    }

    #[test]
    fn concurrent_appends_from_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.txt");
        let archive = Arc::new(Archive::open(&path));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let archive = Arc::clone(&archive);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let id = format!("https://a.test/{}", i % 20 + t % 2);
                        let _ = archive.append(&ArchiveRecord::new(id, RecordStatus::Completed));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let reopened = Archive::open(&path);
        assert_eq!(reopened.len(), 21);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 21, "each identifier written once");
    }
}

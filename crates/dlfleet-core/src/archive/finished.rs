//! Finished-log: one absolute job path per line.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::ArchiveIoError;
use crate::sync;

use super::{append_line_locked, read_lines_lenient};

#[derive(Debug)]
pub struct FinishedLog {
    path: PathBuf,
    ids: RwLock<HashSet<PathBuf>>,
}

impl FinishedLog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids: HashSet<PathBuf> = read_lines_lenient(&path, "finished-log")
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect();
        tracing::debug!(path = %path.display(), jobs = ids.len(), "finished-log loaded");
        Self {
            path,
            ids: RwLock::new(ids),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, job: &Path) -> bool {
        sync::read(&self.ids).contains(job)
    }

    pub fn len(&self) -> usize {
        sync::read(&self.ids).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a finished job. Returns `Ok(false)` if it was already logged.
    pub fn append(&self, job: &Path) -> Result<bool, ArchiveIoError> {
        if !sync::write(&self.ids).insert(job.to_path_buf()) {
            return Ok(false);
        }
        append_line_locked(&self.path, &job.to_string_lossy()).map_err(|source| {
            tracing::warn!(path = %self.path.display(), job = %job.display(), "finished-log append failed: {}", source);
            ArchiveIoError {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok(true)
    }
}

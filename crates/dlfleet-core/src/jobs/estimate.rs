//! Remaining-work estimators.
//!
//! Best-effort contract: `remaining` returns a value in `0..=items.len()`.
//! Estimates only drive ranking and eligibility; the slot that claims a job
//! re-derives its pending items from the archive. A job estimated at zero is
//! treated as finished without re-running its items.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::archive::Archive;
use crate::config::EstimatorKind;

use super::JobId;

/// What an estimator sees of a job.
#[derive(Debug, Clone, Copy)]
pub struct EstimateInput<'a> {
    pub id: &'a JobId,
    pub items: &'a [String],
    pub output: &'a Path,
}

pub trait RemainingEstimator: Send + Sync {
    fn remaining(&self, job: &EstimateInput<'_>) -> usize;
}

/// Items not yet recorded in the archive.
pub struct ArchiveEstimator {
    archive: Arc<Archive>,
}

impl ArchiveEstimator {
    pub fn new(archive: Arc<Archive>) -> Self {
        Self { archive }
    }
}

impl RemainingEstimator for ArchiveEstimator {
    fn remaining(&self, job: &EstimateInput<'_>) -> usize {
        job.items
            .iter()
            .filter(|item| !self.archive.contains(item))
            .count()
    }
}

/// Item count minus distinct finished files in the job's output directory.
///
/// Duplicate downloads (`clip (1).mp4`, `clip.1.mp4`) collapse onto one name and
/// partial files are ignored. This can over- or under-count when a single item
/// yields several files or names collide.
pub struct OutputDirEstimator;

const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".tmp", ".temp"];

impl RemainingEstimator for OutputDirEstimator {
    fn remaining(&self, job: &EstimateInput<'_>) -> usize {
        let entries = match fs::read_dir(job.output) {
            Ok(entries) => entries,
            Err(_) => return job.items.len(),
        };
        let present: HashSet<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| {
                !name.starts_with('.') && !PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s))
            })
            .map(|name| normalize_duplicate_name(&name))
            .collect();
        job.items.len().saturating_sub(present.len())
    }
}

fn duplicate_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<base>.+?)(?: \(\d+\)|\.\d+)$").expect("duplicate suffix pattern")
    })
}

/// `clip (2).mp4` and `clip.2.mp4` both normalize to `clip.mp4`.
pub fn normalize_duplicate_name(name: &str) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };
    match duplicate_suffix().captures(stem) {
        Some(caps) => format!("{}{}", &caps["base"], ext),
        None => name.to_string(),
    }
}

pub fn estimator_for(kind: EstimatorKind, archive: Arc<Archive>) -> Arc<dyn RemainingEstimator> {
    match kind {
        EstimatorKind::Archive => Arc::new(ArchiveEstimator::new(archive)),
        EstimatorKind::OutputDir => Arc::new(OutputDirEstimator),
    }
}

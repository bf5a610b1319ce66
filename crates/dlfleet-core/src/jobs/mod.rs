//! Jobs: claimable URL lists and the pool that hands them out.
//!
//! A job is one job-definition file; its items are the URLs inside. The
//! [`JobPool`] owns every unfinished job, splits them into a priority and a
//! regular pool, ranks eligible jobs and guarantees single-winner claims.

mod estimate;
mod pool;
mod rank;
mod source;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use estimate::{
    estimator_for, normalize_duplicate_name, ArchiveEstimator, EstimateInput,
    OutputDirEstimator, RemainingEstimator,
};
pub use pool::{JobPool, JobView, PoolOptions, PoolStats, Preemption, Released};
pub use rank::compare_jobs;
pub use source::{parse_job_file, scan_sources, JobSource};

/// Stable job identifier: the absolute path of the job file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(PathBuf);

impl JobId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Short display name (file stem).
    pub fn name(&self) -> String {
        self.0
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.to_string_lossy().into_owned())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Item counters. `remaining = total - completed - bad` and never goes negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub total: usize,
    pub completed: usize,
    pub bad: usize,
}

impl JobCounts {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            bad: 0,
        }
    }

    /// Counts for a job whose estimator reports `remaining` items left.
    pub fn from_remaining(total: usize, remaining: usize) -> Self {
        Self {
            total,
            completed: total - remaining.min(total),
            bad: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed + self.bad)
    }

    pub fn record_completed(&mut self) {
        if self.remaining() > 0 {
            self.completed += 1;
        }
    }

    pub fn record_bad(&mut self) {
        if self.remaining() > 0 {
            self.bad += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "slot")]
pub enum ClaimState {
    Unclaimed,
    Claimed(usize),
    Finished,
}

/// A job as held by the pool.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub items: Vec<String>,
    pub output: PathBuf,
    /// Backend class of the job's items (name of the tool that handles the first item).
    pub class: String,
    pub counts: JobCounts,
    pub state: ClaimState,
    pub priority: bool,
    /// Stalls and spawn failures per item, carried across claims.
    pub strikes: HashMap<String, u32>,
    /// Items already given up on.
    pub bad_items: HashSet<String>,
}

impl Job {
    pub fn remaining(&self) -> usize {
        self.counts.remaining()
    }
}

/// A job checked out by one slot. Returned to the pool with [`JobPool::release`].
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub items: Vec<String>,
    pub output: PathBuf,
    pub class: String,
    pub counts: JobCounts,
    pub priority: bool,
    pub strikes: HashMap<String, u32>,
    pub bad_items: HashSet<String>,
    pub slot: usize,
}

impl ClaimedJob {
    /// Count a strike against `item`; returns the new total.
    pub fn strike(&mut self, item: &str) -> u32 {
        let n = self.strikes.entry(item.to_string()).or_insert(0);
        *n += 1;
        *n
    }

    pub fn mark_bad(&mut self, item: &str) {
        if self.bad_items.insert(item.to_string()) {
            self.counts.record_bad();
        }
    }
}

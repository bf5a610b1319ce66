//! Error taxonomy for the fleet scheduler.
//!
//! Only [`ConfigError`] and [`FleetError`] ever reach the top-level run. Every
//! per-item failure ([`ItemError`], [`SpawnError`], [`ArchiveIoError`]) is
//! absorbed by the worker slot and shows up as counters and log lines.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Invalid configuration or flag combination. Fatal before any slot starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("workers must be at least 1")]
    NoWorkers,
    #[error("stall timeout must be greater than zero")]
    ZeroStallTimeout,
    #[error("tick interval must be greater than zero")]
    ZeroTick,
    #[error("preemption requires ranked selection")]
    PreemptWithRandom,
    #[error("per-slot speed cap {max} B/s is below the throttle floor {floor} B/s")]
    SlotMaxBelowFloor { max: u64, floor: u64 },
    #[error("speed ceiling {ceiling} B/s is below the throttle floor {floor} B/s")]
    CeilingBelowFloor { ceiling: u64, floor: u64 },
    #[error("throttle water marks out of order: low {low} must be below high {high}")]
    WaterMarks { low: f64, high: f64 },
    #[error("throttle growth factor must be above 1 and below high_water / low_water (got {0})")]
    GrowthFactor(f64),
    #[error("throttle tolerance must be above 0 and below 1 - 1/high_water (got {0})")]
    Tolerance(f64),
    #[error("no downloader tools configured")]
    NoTools,
    #[error("tool {0:?} has an empty program")]
    EmptyProgram(String),
    #[error("no job directory given (pass one on the command line or set jobs_dir)")]
    MissingJobsDir,
    #[error("invalid byte rate {0:?} (expected e.g. 500K, 2.5M, 1G)")]
    InvalidRate(String),
}

/// The child process for an item could not be started.
#[derive(Debug, Error)]
#[error("failed to start {program}: {source}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: io::Error,
}

/// Reading or appending the archive / finished-log failed.
///
/// Never fatal: the in-memory view stays authoritative for the rest of the run.
#[derive(Debug, Error)]
#[error("archive i/o on {}: {source}", path.display())]
pub struct ArchiveIoError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Why a single item did not complete.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("no events for {0:?}")]
    Stalled(Duration),
    #[error("job time limit exceeded")]
    TimeLimitExceeded,
    #[error("run aborted")]
    Aborted,
    #[error("download failed: {0}")]
    Failed(String),
    #[error("backend exited without a terminal event")]
    BackendTerminalAmbiguous,
}

/// Unrecoverable startup or run failure.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("job source directory {}: {source}", path.display())]
    Sources {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("scheduler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// State directory or other path setup failed.
    #[error(transparent)]
    Setup(#[from] anyhow::Error),
}

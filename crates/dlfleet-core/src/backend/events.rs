use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Live progress of one item as reported by the tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Progress {
    pub percent: Option<f64>,
    pub downloaded: Option<u64>,
    pub total: Option<u64>,
    /// Bytes per second.
    pub speed: Option<f64>,
    pub eta: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishStatus {
    Completed,
    AlreadyExists,
    Failed,
}

/// Events for the item currently being downloaded. Consumed immediately by
/// the owning slot and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Start,
    Progress(Progress),
    Destination { path: PathBuf },
    AlreadyExists,
    Log { line: String },
    /// Liveness only; resets the stall clock.
    Heartbeat,
    Finish {
        status: FinishStatus,
        error: Option<String>,
    },
}

impl DownloadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadEvent::Finish { .. })
    }
}

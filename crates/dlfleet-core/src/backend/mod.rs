//! Downloader backend protocol.
//!
//! A backend turns one item into a live stream of [`DownloadEvent`]s by
//! driving a child process. The scheduler only sees the event stream and a
//! [`ProcessController`] for suspend/resume/terminate; tool command lines and
//! output formats stay behind this boundary.

mod command;
mod events;
mod handle;
mod parse;
mod process;

use std::path::PathBuf;

use crate::error::SpawnError;

pub use command::CommandBackend;
pub use events::{DownloadEvent, FinishStatus, Progress};
pub use handle::DownloadHandle;
pub use parse::{parse_eta, parse_size, LineParser};
pub use process::{ChildProcess, ProcessController};

/// Which tool handles an item, and whether the throttle may cap it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendClass {
    pub name: String,
    pub throttled: bool,
}

/// One item to download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub item: String,
    pub output: PathBuf,
    /// Per-process rate cap in bytes per second. Only honoured by throttled classes.
    pub rate_limit: Option<u64>,
}

pub trait DownloaderBackend: Send + Sync {
    /// Pure function of the item identifier.
    fn class_of(&self, item: &str) -> BackendClass;

    /// Start downloading one item. Must be called from within a tokio runtime.
    fn download(&self, request: &DownloadRequest) -> Result<DownloadHandle, SpawnError>;
}

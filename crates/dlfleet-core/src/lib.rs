//! Download fleet scheduler.
//!
//! Fans a large, prioritised set of download jobs out over a bounded pool of
//! worker slots, each supervising an external downloader tool. Aggregate
//! throughput is kept under an optional ceiling by adaptive per-slot rate
//! caps, stalled or over-long assignments are requeued, and completed items
//! and jobs are recorded durably so restarts are idempotent.

pub mod archive;
pub mod backend;
pub mod config;
pub mod control;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod retry;
pub mod scheduler;
pub mod throttle;

mod sync;

pub use error::{ArchiveIoError, ConfigError, FleetError, ItemError, SpawnError};
pub use scheduler::{FleetStatus, RunSummary, Scheduler};

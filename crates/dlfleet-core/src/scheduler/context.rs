//! Explicit scheduler context shared by slots, the control loop and rescans.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::archive::{Archive, ArchiveRecord, FinishedLog};
use crate::backend::DownloaderBackend;
use crate::config::FleetConfig;
use crate::control::RunControl;
use crate::jobs::{JobId, JobPool, RemainingEstimator};
use crate::retry::RetryPolicy;
use crate::sync::lock;
use crate::throttle::ThrottleController;

use super::rescan::Coalescer;
use super::slot::SlotShared;
use super::status::{FleetStatus, RunSummary, Totals};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub jobs_finished: AtomicU64,
    pub items_completed: AtomicU64,
    pub items_bad: AtomicU64,
    pub items_stalled: AtomicU64,
    pub items_retried: AtomicU64,
    pub requeues: AtomicU64,
    pub preemptions: AtomicU64,
    pub cap_changes: AtomicU64,
    pub rescans: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

pub(crate) struct SchedulerContext {
    pub config: FleetConfig,
    pub pool: Mutex<JobPool>,
    /// Signalled whenever a job is released or estimates change.
    pub pool_changed: Notify,
    pub archive: Arc<Archive>,
    pub finished_log: Arc<FinishedLog>,
    pub throttle: Mutex<ThrottleController>,
    pub control: RunControl,
    pub slots: Vec<Arc<SlotShared>>,
    pub counters: Counters,
    pub backend: Arc<dyn DownloaderBackend>,
    pub estimator: Arc<dyn RemainingEstimator>,
    pub retry: RetryPolicy,
    pub rescan: Coalescer,
    pub started: Instant,
    pub status_tx: watch::Sender<FleetStatus>,
}

impl SchedulerContext {
    /// Append an item to the archive off the async threads.
    pub async fn archive_item(&self, record: ArchiveRecord) {
        let archive = Arc::clone(&self.archive);
        // Failures are logged by the archive itself; memory stays authoritative.
        if let Err(e) = tokio::task::spawn_blocking(move || archive.append(&record)).await {
            tracing::warn!("archive append task failed: {}", e);
        }
    }

    /// Record a finished job durably.
    pub async fn log_finished(&self, id: &JobId) {
        Counters::bump(&self.counters.jobs_finished);
        tracing::info!(job = %id, "job finished");
        let log = Arc::clone(&self.finished_log);
        let path = id.path().to_path_buf();
        match tokio::task::spawn_blocking(move || log.append(&path)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(job = %id, "{}", e),
            Err(e) => tracing::warn!(job = %id, "finished-log task failed: {}", e),
        }
    }

    pub fn snapshot(&self) -> FleetStatus {
        let now = Instant::now();
        let slots: Vec<_> = self.slots.iter().map(|s| s.status(now)).collect();
        let pool = lock(&self.pool).stats();
        let (aggregate_speed, ceiling) = {
            let throttle = lock(&self.throttle);
            (throttle.aggregate(), throttle.ceiling())
        };
        let c = &self.counters;
        FleetStatus {
            slots,
            aggregate_speed,
            ceiling,
            paused: self.control.is_paused(),
            aborted: self.control.is_aborted(),
            totals: Totals {
                jobs_pending: pool.pending,
                jobs_claimed: pool.claimed,
                jobs_finished: Counters::get(&c.jobs_finished),
                items_completed: Counters::get(&c.items_completed),
                items_bad: Counters::get(&c.items_bad),
                items_stalled: Counters::get(&c.items_stalled),
                items_retried: Counters::get(&c.items_retried),
                requeues: Counters::get(&c.requeues),
                preemptions: Counters::get(&c.preemptions),
                cap_changes: Counters::get(&c.cap_changes),
                rescans: Counters::get(&c.rescans),
            },
            elapsed_secs: now.duration_since(self.started).as_secs_f64(),
        }
    }

    pub fn publish_status(&self) {
        self.status_tx.send_replace(self.snapshot());
    }

    pub fn summary(&self) -> RunSummary {
        let c = &self.counters;
        RunSummary {
            jobs_finished: Counters::get(&c.jobs_finished),
            items_completed: Counters::get(&c.items_completed),
            items_bad: Counters::get(&c.items_bad),
            items_stalled: Counters::get(&c.items_stalled),
            requeues: Counters::get(&c.requeues),
            preemptions: Counters::get(&c.preemptions),
            aborted: self.control.is_aborted(),
            elapsed: self.started.elapsed(),
        }
    }
}

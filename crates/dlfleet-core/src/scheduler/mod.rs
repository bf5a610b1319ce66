//! Fleet scheduler.
//!
//! Owns N worker slots, the job pool, the archive and the throttle controller.
//! Each slot is an independent tokio task that claims a job, drives its items
//! through the downloader backend one at a time and releases it. A control
//! loop runs the throttle, the run deadline and the rescan timer, and
//! publishes a [`FleetStatus`] snapshot every tick.

mod context;
mod control_loop;
mod rescan;
mod slot;
mod status;

use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::archive::{Archive, FinishedLog};
use crate::backend::DownloaderBackend;
use crate::config::FleetConfig;
use crate::control::RunControl;
use crate::error::FleetError;
use crate::jobs::{
    estimator_for, scan_sources, JobPool, JobView, PoolOptions, RemainingEstimator,
};
use crate::retry::RetryPolicy;
use crate::sync::lock;
use crate::throttle::ThrottleController;

use context::{Counters, SchedulerContext};
use slot::SlotShared;

pub use status::{FleetStatus, ItemProgress, RunSummary, SlotState, SlotStatus, Totals};

pub struct Scheduler {
    ctx: Arc<SchedulerContext>,
    status_rx: watch::Receiver<FleetStatus>,
}

impl Scheduler {
    /// Validate the config, open the archive and finished-log, scan job
    /// sources and build the pool. Uses the estimator named in the config.
    pub fn new(
        config: FleetConfig,
        backend: Arc<dyn DownloaderBackend>,
    ) -> Result<Self, FleetError> {
        config.validate()?;
        let archive = Arc::new(Archive::open(config.archive_path()?));
        let estimator = estimator_for(config.estimator, Arc::clone(&archive));
        Self::assemble(config, backend, archive, estimator)
    }

    /// Like [`Scheduler::new`] with a custom remaining-work estimator.
    pub fn with_estimator(
        config: FleetConfig,
        backend: Arc<dyn DownloaderBackend>,
        estimator: Arc<dyn RemainingEstimator>,
    ) -> Result<Self, FleetError> {
        config.validate()?;
        let archive = Arc::new(Archive::open(config.archive_path()?));
        Self::assemble(config, backend, archive, estimator)
    }

    fn assemble(
        config: FleetConfig,
        backend: Arc<dyn DownloaderBackend>,
        archive: Arc<Archive>,
        estimator: Arc<dyn RemainingEstimator>,
    ) -> Result<Self, FleetError> {
        let finished_log = Arc::new(FinishedLog::open(config.finished_log_path()?));
        let pool = build_pool(
            &config,
            backend.as_ref(),
            &finished_log,
            estimator.as_ref(),
            false,
        )?;
        let slots = (0..config.workers)
            .map(|i| Arc::new(SlotShared::new(i)))
            .collect();
        let (status_tx, status_rx) = watch::channel(FleetStatus::default());
        let ctx = Arc::new(SchedulerContext {
            throttle: Mutex::new(ThrottleController::new(&config.throttle)),
            retry: RetryPolicy::from(&config.retry_config()),
            config,
            pool: Mutex::new(pool),
            pool_changed: Notify::new(),
            archive,
            finished_log,
            control: RunControl::new(),
            slots,
            counters: Counters::default(),
            backend,
            estimator,
            rescan: Default::default(),
            started: Instant::now(),
            status_tx,
        });
        ctx.publish_status();
        Ok(Self { ctx, status_rx })
    }

    /// Unfinished jobs in claim order, without building a scheduler.
    ///
    /// Nothing is written: jobs estimated at zero are left out of the listing
    /// but not appended to the finished-log.
    pub fn list_pool(
        config: &FleetConfig,
        backend: &dyn DownloaderBackend,
    ) -> Result<Vec<JobView>, FleetError> {
        config.validate()?;
        let archive = Arc::new(Archive::open(config.archive_path()?));
        let estimator = estimator_for(config.estimator, archive);
        let finished_log = FinishedLog::open(config.finished_log_path()?);
        let pool = build_pool(config, backend, &finished_log, estimator.as_ref(), true)?;
        Ok(pool.ranked())
    }

    /// Abort/pause handle for this run.
    pub fn control(&self) -> RunControl {
        self.ctx.control.clone()
    }

    /// Receiver for the per-tick status snapshot.
    pub fn status(&self) -> watch::Receiver<FleetStatus> {
        self.status_rx.clone()
    }

    /// Build a snapshot now instead of waiting for the next tick.
    pub fn snapshot(&self) -> FleetStatus {
        self.ctx.snapshot()
    }

    /// Unfinished jobs in claim order.
    pub fn pool(&self) -> Vec<JobView> {
        lock(&self.ctx.pool).ranked()
    }

    /// Ask for a rescan now; coalesced with any rescan in flight.
    pub fn request_rescan(&self) {
        rescan::request_rescan(&self.ctx);
    }

    /// Run every slot until the pool drains or the run is aborted.
    ///
    /// Per-item failures never surface here. A slot task that panics aborts
    /// the whole run and is reported as [`FleetError::Join`].
    pub async fn run(&self) -> Result<RunSummary, FleetError> {
        let done = CancellationToken::new();
        let control = tokio::spawn(control_loop::run_control_loop(
            Arc::clone(&self.ctx),
            done.clone(),
        ));
        tracing::info!(workers = self.ctx.slots.len(), "fleet run started");

        let mut set = JoinSet::new();
        for slot in &self.ctx.slots {
            set.spawn(slot::run_slot(Arc::clone(&self.ctx), Arc::clone(slot)));
        }
        let mut failure = None;
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                tracing::error!("slot task failed: {}", e);
                self.ctx.control.abort();
                failure.get_or_insert(e);
            }
        }

        done.cancel();
        if let Err(e) = control.await {
            tracing::warn!("control loop failed: {}", e);
        }
        if let Some(e) = failure {
            return Err(FleetError::Join(e));
        }
        let summary = self.ctx.summary();
        tracing::info!(
            jobs_finished = summary.jobs_finished,
            items_completed = summary.items_completed,
            items_bad = summary.items_bad,
            aborted = summary.aborted,
            "fleet run finished"
        );
        Ok(summary)
    }
}

fn build_pool(
    config: &FleetConfig,
    backend: &dyn DownloaderBackend,
    finished_log: &FinishedLog,
    estimator: &dyn RemainingEstimator,
    read_only: bool,
) -> Result<JobPool, FleetError> {
    let sources = scan_sources(config.jobs_dir()?, &config.output_root())?;
    Ok(JobPool::build(
        sources,
        finished_log,
        estimator,
        &config.priority,
        |item| backend.class_of(item).name,
        PoolOptions {
            selection: config.selection,
            rank: config.rank,
            read_only,
        },
    ))
}

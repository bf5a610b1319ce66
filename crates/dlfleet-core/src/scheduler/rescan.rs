//! Asynchronous rescans: refresh remaining-estimates without blocking claims.
//!
//! At most one rescan runs at a time. Requests that arrive while one is in
//! flight collapse into a single follow-up run (queue depth 1).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::jobs::EstimateInput;
use crate::sync::lock;

use super::context::{Counters, SchedulerContext};
use super::status::SlotState;

#[derive(Debug, Default)]
pub(crate) struct Coalescer {
    running: AtomicBool,
    pending: AtomicBool,
}

impl Coalescer {
    /// Record a request. Returns true if the caller must start the worker.
    pub fn request(&self) -> bool {
        self.pending.store(true, Ordering::Release);
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Consume the pending request, if any.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Worker is about to stop. Returns true if a request slipped in and the
    /// worker must keep going.
    pub fn finish(&self) -> bool {
        self.running.store(false, Ordering::Release);
        self.pending.load(Ordering::Acquire)
            && self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }
}

pub(crate) fn request_rescan(ctx: &Arc<SchedulerContext>) {
    if ctx.rescan.request() {
        let ctx = Arc::clone(ctx);
        tokio::spawn(async move {
            loop {
                while ctx.rescan.take_pending() {
                    if ctx.control.is_aborted() {
                        break;
                    }
                    run_once(&ctx).await;
                }
                if !ctx.rescan.finish() {
                    break;
                }
            }
        });
    } else {
        tracing::debug!("rescan already running, coalesced");
    }
}

/// One rescan pass.
pub(crate) async fn run_once(ctx: &Arc<SchedulerContext>) {
    let targets = lock(&ctx.pool).rescan_targets();
    let archive = Arc::clone(&ctx.archive);
    let estimator = Arc::clone(&ctx.estimator);
    let result = tokio::task::spawn_blocking(move || {
        let added = archive.refresh();
        let estimates: Vec<_> = targets
            .iter()
            .map(|t| {
                let remaining = estimator.remaining(&EstimateInput {
                    id: &t.id,
                    items: &t.items,
                    output: &t.output,
                });
                (t.id.clone(), remaining)
            })
            .collect();
        (added, estimates)
    })
    .await;
    let (added, estimates) = match result {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("rescan task failed: {}", e);
            return;
        }
    };
    if ctx.control.is_aborted() {
        return;
    }

    let idle = ctx
        .slots
        .iter()
        .filter(|s| s.state() == SlotState::Idle)
        .count();
    let scanned = estimates.len();
    let (finished, plan) = {
        let mut pool = lock(&ctx.pool);
        let finished = pool.apply_estimates(estimates);
        let plan = if ctx.config.preempt {
            pool.preemption_plan(idle)
        } else {
            Vec::new()
        };
        (finished, plan)
    };
    tracing::debug!(
        scanned,
        archive_added = added,
        finished = finished.len(),
        "rescan done"
    );

    for id in &finished {
        ctx.log_finished(id).await;
    }
    for p in plan {
        tracing::info!(slot = p.slot, job = %p.job, "preempting for a better-ranked job");
        if let Some(slot) = ctx.slots.get(p.slot) {
            slot.request_preempt(p.job);
        }
    }
    ctx.pool_changed.notify_waiters();
    Counters::bump(&ctx.counters.rescans);
}

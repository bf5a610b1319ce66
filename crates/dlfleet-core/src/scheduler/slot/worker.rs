//! The slot loop: admission, claim, drive the job's items, release.

use std::sync::Arc;

use tokio::time::{sleep, Instant};

use crate::archive::{ArchiveRecord, RecordStatus};
use crate::backend::FinishStatus;
use crate::jobs::{ClaimedJob, JobCounts, JobId, Released};
use crate::sync::lock;

use super::super::context::{Counters, SchedulerContext};
use super::item::{drive_item_with_retries, hold_while_paused, Deadline, ItemOutcome};
use super::SlotShared;

/// Why a slot gave its job back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobExit {
    /// Every pending item was attempted.
    Exhausted,
    Aborted,
    TimeLimit,
    Preempted,
    SpawnFailed,
}

pub(crate) async fn run_slot(ctx: Arc<SchedulerContext>, slot: Arc<SlotShared>) {
    let mut avoid: Option<JobId> = None;
    loop {
        if ctx.control.is_aborted() {
            break;
        }
        let admitted = !ctx.control.is_paused() && lock(&ctx.throttle).admits_new_work();
        if !admitted {
            tokio::select! {
                _ = ctx.control.aborted() => {}
                _ = sleep(ctx.config.tick()) => {}
            }
            continue;
        }

        // Register before claiming so a release between the claim and the
        // wait is not missed.
        let notified = ctx.pool_changed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let (claimed, drained) = {
            let mut pool = lock(&ctx.pool);
            let claimed = pool.claim_next(slot.index, avoid.as_ref());
            let drained = claimed.is_none() && pool.is_drained();
            (claimed, drained)
        };
        match claimed {
            Some(job) => {
                avoid = drive_job(&ctx, &slot, job).await;
            }
            None if drained => {
                tracing::debug!(slot = slot.index, "no work left");
                break;
            }
            None => {
                avoid = None;
                tokio::select! {
                    _ = &mut notified => {}
                    _ = ctx.control.aborted() => {}
                    _ = sleep(ctx.config.tick()) => {}
                }
            }
        }
    }
    slot.set_terminal();
    // Other idle slots may be waiting for the pool to drain.
    ctx.pool_changed.notify_waiters();
}

/// Drive one claimed job until its items run out or something interrupts it.
/// Returns the job to avoid on the next claim, if any.
async fn drive_job(
    ctx: &SchedulerContext,
    slot: &SlotShared,
    mut job: ClaimedJob,
) -> Option<JobId> {
    let started = Instant::now();
    let pending: Vec<String> = job
        .items
        .iter()
        .filter(|i| !ctx.archive.contains(i) && !job.bad_items.contains(*i))
        .cloned()
        .collect();
    let unarchived = job
        .items
        .iter()
        .filter(|i| !ctx.archive.contains(i))
        .count();
    job.counts = JobCounts {
        total: job.counts.total,
        completed: job.counts.total - unarchived,
        bad: job.bad_items.len().min(unarchived),
    };
    slot.assign(&job, pending.len(), started);
    tracing::info!(
        slot = slot.index,
        job = %job.id,
        pending = pending.len(),
        remaining = job.counts.remaining(),
        "claimed job"
    );

    let mut deadline = Deadline(ctx.config.time_limit().map(|limit| started + limit));
    let mut pause_rx = ctx.control.subscribe_pause();
    let mut exit = JobExit::Exhausted;

    for (index, item) in pending.iter().enumerate() {
        if ctx.control.is_aborted() {
            exit = JobExit::Aborted;
            break;
        }
        if slot.take_preempt(&job.id) {
            exit = JobExit::Preempted;
            break;
        }
        match hold_while_paused(ctx, slot, &mut pause_rx, None).await {
            Ok(paused) => deadline.extend(paused),
            Err(()) => {
                exit = JobExit::Aborted;
                break;
            }
        }
        if deadline.expired(Instant::now()) {
            exit = JobExit::TimeLimit;
            break;
        }

        slot.begin_item(item, index);
        let item_started = Instant::now();
        let outcome =
            drive_item_with_retries(ctx, slot, &job.id, &job.output, item, &mut deadline).await;
        slot.between_items();
        match outcome {
            ItemOutcome::Done(status) => {
                let record_status = match status {
                    FinishStatus::AlreadyExists => RecordStatus::AlreadyExists,
                    _ => RecordStatus::Completed,
                };
                let record = ArchiveRecord::new(item.clone(), record_status)
                    .with_elapsed(item_started.elapsed())
                    .with_size(slot.last_total())
                    .with_metadata(job.id.name());
                ctx.archive_item(record).await;
                job.counts.record_completed();
                Counters::bump(&ctx.counters.items_completed);
                tracing::debug!(slot = slot.index, item, ?status, "item done");
            }
            ItemOutcome::Bad(err) => {
                tracing::warn!(slot = slot.index, item, "giving up on item: {}", err);
                job.mark_bad(item);
                Counters::bump(&ctx.counters.items_bad);
            }
            ItemOutcome::Stalled => {
                Counters::bump(&ctx.counters.items_stalled);
                if strike_out(ctx, slot, &mut job, item) {
                    continue;
                }
                tracing::info!(
                    slot = slot.index,
                    item,
                    "stalled item deferred to a later pass"
                );
            }
            ItemOutcome::SpawnFailed(err) => {
                tracing::warn!(slot = slot.index, item, "{}", err);
                strike_out(ctx, slot, &mut job, item);
                exit = JobExit::SpawnFailed;
                break;
            }
            ItemOutcome::Aborted => {
                exit = JobExit::Aborted;
                break;
            }
            ItemOutcome::TimeLimit => {
                exit = JobExit::TimeLimit;
                break;
            }
            ItemOutcome::Preempted => {
                exit = JobExit::Preempted;
                break;
            }
        }
    }

    release(ctx, slot, job, exit).await
}

/// Count a strike; once the budget is spent the item is bad. Returns true if it went bad.
fn strike_out(ctx: &SchedulerContext, slot: &SlotShared, job: &mut ClaimedJob, item: &str) -> bool {
    let strikes = job.strike(item);
    if strikes < ctx.config.max_stalls_per_item.max(1) {
        return false;
    }
    tracing::warn!(
        slot = slot.index,
        item,
        strikes,
        "item out of strikes, counting as bad"
    );
    job.mark_bad(item);
    Counters::bump(&ctx.counters.items_bad);
    true
}

async fn release(
    ctx: &SchedulerContext,
    slot: &SlotShared,
    job: ClaimedJob,
    exit: JobExit,
) -> Option<JobId> {
    let id = job.id.clone();
    let released = lock(&ctx.pool).release(job);
    match &released {
        Released::Finished(id) => ctx.log_finished(id).await,
        Released::Requeued { remaining } => {
            Counters::bump(&ctx.counters.requeues);
            if exit == JobExit::Preempted {
                Counters::bump(&ctx.counters.preemptions);
            }
            tracing::info!(slot = slot.index, job = %id, remaining, reason = ?exit, "job requeued");
        }
        Released::Unknown => {
            tracing::warn!(slot = slot.index, job = %id, "released a job the pool does not know");
        }
    }
    slot.set_idle();
    ctx.pool_changed.notify_waiters();
    match (exit, released) {
        (
            JobExit::TimeLimit | JobExit::SpawnFailed | JobExit::Exhausted,
            Released::Requeued { .. },
        ) => Some(id),
        _ => None,
    }
}

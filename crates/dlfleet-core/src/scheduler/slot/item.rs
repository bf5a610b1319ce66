//! Driving one item through the backend: spawn, read events, and react to
//! abort, pause, stalls, the job time limit, preemption and cap changes.

use std::path::Path;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};

use crate::backend::{DownloadEvent, DownloadHandle, DownloadRequest, FinishStatus};
use crate::error::ItemError;
use crate::jobs::JobId;
use crate::retry::{classify, ErrorKind, RetryDecision};
use crate::sync::lock;

use super::super::context::{Counters, SchedulerContext};
use super::SlotShared;

/// Why the slot stopped driving an item before it finished.
#[derive(Debug)]
pub(super) enum Stop {
    Item(ItemError),
    Preempted,
}

impl From<ItemError> for Stop {
    fn from(e: ItemError) -> Self {
        Stop::Item(e)
    }
}

/// Result of an item after retries.
#[derive(Debug)]
pub(super) enum ItemOutcome {
    Done(FinishStatus),
    /// Given up on after retries.
    Bad(ItemError),
    Stalled,
    /// The tool would not start, even after retries.
    SpawnFailed(ItemError),
    Aborted,
    TimeLimit,
    Preempted,
}

/// Per-job deadline, shifted forward by time spent paused.
#[derive(Debug, Clone, Copy)]
pub(super) struct Deadline(pub Option<Instant>);

impl Deadline {
    pub fn expired(&self, now: Instant) -> bool {
        self.0.map(|d| now >= d).unwrap_or(false)
    }

    pub fn extend(&mut self, by: Duration) {
        if let Some(d) = self.0.as_mut() {
            *d += by;
        }
    }
}

fn terminate(handle: &mut DownloadHandle, slot: usize, why: &str) {
    if let Err(e) = handle.terminate() {
        tracing::warn!(slot, "terminating child ({}): {}", why, e);
    }
}

/// Wait out a global pause. The child (if any) is suspended for the duration.
/// Returns the time spent paused, or `Err(())` if the run was aborted meanwhile.
pub(super) async fn hold_while_paused(
    ctx: &SchedulerContext,
    slot: &SlotShared,
    pause_rx: &mut watch::Receiver<bool>,
    handle: Option<&DownloadHandle>,
) -> Result<Duration, ()> {
    if !*pause_rx.borrow_and_update() {
        return Ok(Duration::ZERO);
    }
    let paused_at = Instant::now();
    if let Some(h) = handle {
        if let Err(e) = h.suspend() {
            tracing::warn!(slot = slot.index, "suspend failed: {}", e);
        }
    }
    slot.set_paused(true);
    tracing::debug!(slot = slot.index, "paused");
    let aborted = loop {
        tokio::select! {
            _ = ctx.control.aborted() => break true,
            changed = pause_rx.changed() => {
                if changed.is_err() || !*pause_rx.borrow_and_update() {
                    break false;
                }
            }
        }
    };
    if aborted {
        return Err(());
    }
    if let Some(h) = handle {
        if let Err(e) = h.resume() {
            tracing::warn!(slot = slot.index, "resume failed: {}", e);
        }
    }
    slot.set_paused(false);
    tracing::debug!(slot = slot.index, "resumed");
    Ok(paused_at.elapsed())
}

/// One attempt at an item. Restarts the child in place when the throttle
/// changed this slot's cap; that restart is not a new attempt.
pub(super) async fn drive_item(
    ctx: &SchedulerContext,
    slot: &SlotShared,
    job: &JobId,
    output: &Path,
    item: &str,
    deadline: &mut Deadline,
) -> Result<FinishStatus, Stop> {
    let stall = ctx.config.stall_timeout();
    let mut pause_rx = ctx.control.subscribe_pause();
    'spawn: loop {
        let class = ctx.backend.class_of(item);
        let cap = if class.throttled {
            lock(&ctx.throttle).cap_for(slot.index)
        } else {
            None
        };
        let request = DownloadRequest {
            item: item.to_string(),
            output: output.to_path_buf(),
            rate_limit: cap,
        };
        let mut handle = ctx
            .backend
            .download(&request)
            .map_err(|e| Stop::Item(e.into()))?;
        tracing::debug!(slot = slot.index, item, class = %class.name, ?cap, "started");
        slot.running(class.clone(), cap, Instant::now());
        let mut last_event = Instant::now();

        match hold_while_paused(ctx, slot, &mut pause_rx, Some(&handle)).await {
            Ok(paused) => {
                deadline.extend(paused);
                if !paused.is_zero() {
                    last_event = Instant::now();
                }
            }
            Err(()) => {
                terminate(&mut handle, slot.index, "abort");
                return Err(ItemError::Aborted.into());
            }
        }

        loop {
            let stall_at = last_event + stall;
            let limit_at = deadline.0.unwrap_or_else(Instant::now);
            tokio::select! {
                biased;
                _ = ctx.control.aborted() => {
                    terminate(&mut handle, slot.index, "abort");
                    return Err(ItemError::Aborted.into());
                }
                _ = slot.wake.notified() => {
                    if slot.take_preempt(job) {
                        terminate(&mut handle, slot.index, "preempt");
                        return Err(Stop::Preempted);
                    }
                    if class.throttled {
                        let desired = lock(&ctx.throttle).cap_for(slot.index);
                        if desired != cap {
                            tracing::info!(slot = slot.index, item, cap = ?desired, "restarting with new rate cap");
                            terminate(&mut handle, slot.index, "cap change");
                            continue 'spawn;
                        }
                    }
                }
                changed = pause_rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    match hold_while_paused(ctx, slot, &mut pause_rx, Some(&handle)).await {
                        Ok(paused) => {
                            deadline.extend(paused);
                            last_event = Instant::now();
                        }
                        Err(()) => {
                            terminate(&mut handle, slot.index, "abort");
                            return Err(ItemError::Aborted.into());
                        }
                    }
                }
                _ = sleep_until(stall_at) => {
                    tracing::warn!(slot = slot.index, item, "no events for {:?}, killing child", stall);
                    terminate(&mut handle, slot.index, "stall");
                    return Err(ItemError::Stalled(stall).into());
                }
                _ = sleep_until(limit_at), if deadline.0.is_some() => {
                    tracing::info!(slot = slot.index, item, "job time limit reached");
                    terminate(&mut handle, slot.index, "time limit");
                    return Err(ItemError::TimeLimitExceeded.into());
                }
                event = handle.next_event() => {
                    let Some(event) = event else {
                        return Err(ItemError::BackendTerminalAmbiguous.into());
                    };
                    let now = Instant::now();
                    last_event = now;
                    slot.touch(now);
                    match event {
                        DownloadEvent::Finish { status: FinishStatus::Failed, error } => {
                            return Err(ItemError::Failed(
                                error.unwrap_or_else(|| "tool reported failure".to_string()),
                            )
                            .into());
                        }
                        DownloadEvent::Finish { status, .. } => return Ok(status),
                        DownloadEvent::Progress(p) => slot.progress(p),
                        DownloadEvent::Destination { path } => {
                            tracing::debug!(slot = slot.index, item, path = %path.display(), "destination");
                        }
                        DownloadEvent::AlreadyExists => {
                            tracing::debug!(slot = slot.index, item, "already exists");
                        }
                        DownloadEvent::Log { line } => {
                            tracing::trace!(slot = slot.index, item, "{}", line);
                        }
                        DownloadEvent::Start | DownloadEvent::Heartbeat => {}
                    }
                }
            }
        }
    }
}

/// Drive an item, retrying failures the policy considers transient.
pub(super) async fn drive_item_with_retries(
    ctx: &SchedulerContext,
    slot: &SlotShared,
    job: &JobId,
    output: &Path,
    item: &str,
    deadline: &mut Deadline,
) -> ItemOutcome {
    let mut attempt = 1u32;
    loop {
        let err = match drive_item(ctx, slot, job, output, item, deadline).await {
            Ok(status) => return ItemOutcome::Done(status),
            Err(Stop::Preempted) => return ItemOutcome::Preempted,
            Err(Stop::Item(e)) => e,
        };
        slot.between_items();
        match err {
            ItemError::Stalled(_) => return ItemOutcome::Stalled,
            ItemError::Aborted => return ItemOutcome::Aborted,
            ItemError::TimeLimitExceeded => return ItemOutcome::TimeLimit,
            _ => {}
        }
        let kind = classify(&err);
        let delay = match ctx.retry.decide(attempt, kind) {
            RetryDecision::NoRetry => {
                return if kind == ErrorKind::Spawn {
                    ItemOutcome::SpawnFailed(err)
                } else {
                    ItemOutcome::Bad(err)
                };
            }
            RetryDecision::RetryAfter(d) => d,
        };
        Counters::bump(&ctx.counters.items_retried);
        tracing::info!(
            slot = slot.index,
            item,
            attempt,
            "retrying in {:?}: {}",
            delay,
            err
        );
        let limit_at = deadline.0.unwrap_or_else(Instant::now);
        tokio::select! {
            _ = ctx.control.aborted() => return ItemOutcome::Aborted,
            _ = sleep_until(limit_at), if deadline.0.is_some() => return ItemOutcome::TimeLimit,
            _ = sleep(delay) => {}
        }
        attempt += 1;
    }
}

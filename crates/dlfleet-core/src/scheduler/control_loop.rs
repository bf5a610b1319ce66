//! Periodic control loop: run deadline, throttle ticks, rescan timer, status.

use std::sync::Arc;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::sync::lock;

use super::context::{Counters, SchedulerContext};
use super::rescan::request_rescan;

pub(crate) async fn run_control_loop(ctx: Arc<SchedulerContext>, done: CancellationToken) {
    let mut ticker = interval(ctx.config.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let run_deadline = ctx.config.deadline().map(|d| ctx.started + d);
    let rescan_every = ctx.config.rescan_interval();
    let mut next_rescan = rescan_every.map(|every| Instant::now() + every);

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let now = Instant::now();
        if let Some(deadline) = run_deadline {
            if now >= deadline && !ctx.control.is_aborted() {
                tracing::info!("run deadline reached, aborting");
                ctx.control.abort();
            }
        }
        throttle_tick(&ctx, now);
        if let (Some(at), Some(every)) = (next_rescan, rescan_every) {
            if now >= at {
                request_rescan(&ctx);
                next_rescan = Some(now + every);
            }
        }
        ctx.publish_status();
    }
    ctx.publish_status();
}

/// Feed slot samples to the throttle and wake slots whose cap changed.
fn throttle_tick(ctx: &SchedulerContext, now: Instant) {
    let samples: Vec<_> = ctx.slots.iter().map(|s| s.sample()).collect();
    let changes = lock(&ctx.throttle).tick(now.into_std(), &samples);
    for change in changes {
        Counters::bump(&ctx.counters.cap_changes);
        let Some(slot) = ctx.slots.get(change.slot) else {
            continue;
        };
        if slot.running_cap() != Some(change.cap) {
            slot.wake.notify_one();
        }
    }
}

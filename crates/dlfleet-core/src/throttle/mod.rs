//! Adaptive throttle controller.
//!
//! Keeps aggregate measured throughput under an optional global ceiling by
//! adjusting per-slot rate caps. The controller is pure bookkeeping: the
//! control loop feeds it samples every tick and applies the returned
//! [`CapChange`]s by restarting the affected children with the new cap.
//!
//! Hysteresis comes from three places: the high/low water band around the
//! ceiling, a minimum relative change (`tolerance`), and per-slot cooldowns
//! that are shorter for scaling down than for scaling up.

mod entry;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::ThrottleConfig;

use entry::SlotCap;

/// One slot's measurement for a tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotSample {
    pub slot: usize,
    /// Measured bytes per second.
    pub speed: f64,
    pub paused: bool,
    /// A child is running for this slot.
    pub downloading: bool,
    /// The slot's current item is handled by a rate-capable backend class.
    pub throttled: bool,
}

impl SlotSample {
    fn active(&self) -> bool {
        self.downloading && !self.paused
    }
}

/// A cap the control loop must apply to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapChange {
    pub slot: usize,
    pub cap: u64,
    pub previous: Option<u64>,
}

#[derive(Debug)]
pub struct ThrottleController {
    ceiling: Option<f64>,
    slot_max: Option<f64>,
    floor: f64,
    tolerance: f64,
    down_cooldown: Duration,
    up_cooldown: Duration,
    growth: f64,
    high_water: f64,
    low_water: f64,
    slots: HashMap<usize, SlotCap>,
    aggregate: f64,
}

fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s.max(0.0)).unwrap_or(Duration::ZERO)
}

impl ThrottleController {
    pub fn new(cfg: &ThrottleConfig) -> Self {
        Self {
            ceiling: cfg.ceiling_bytes_per_sec.map(|c| c as f64),
            slot_max: cfg.slot_max_bytes_per_sec.map(|c| c as f64),
            floor: cfg.floor_bytes_per_sec as f64,
            tolerance: cfg.tolerance,
            down_cooldown: secs(cfg.scale_down_cooldown_secs),
            up_cooldown: secs(cfg.scale_up_cooldown_secs),
            growth: cfg.growth_factor,
            high_water: cfg.high_water,
            low_water: cfg.low_water,
            slots: HashMap::new(),
            aggregate: 0.0,
        }
    }

    pub fn ceiling(&self) -> Option<u64> {
        self.ceiling.map(|c| c as u64)
    }

    /// Aggregate measured at the last tick, paused slots excluded.
    pub fn aggregate(&self) -> f64 {
        self.aggregate
    }

    /// Rate cap a new child for `slot` should start with.
    pub fn cap_for(&self, slot: usize) -> Option<u64> {
        self.slots
            .get(&slot)
            .and_then(|s| s.cap)
            .or(self.slot_max.map(|m| m as u64))
    }

    /// Idle slots may start new work only while the aggregate is below the ceiling.
    pub fn admits_new_work(&self) -> bool {
        match self.ceiling {
            Some(c) => self.aggregate < c,
            None => true,
        }
    }

    /// Upper bound for any cap: the per-slot max, else the ceiling itself.
    fn max_cap(&self, ceiling: f64) -> f64 {
        self.slot_max.unwrap_or(ceiling).max(self.floor)
    }

    /// Run one controller step over this tick's samples.
    pub fn tick(&mut self, now: Instant, samples: &[SlotSample]) -> Vec<CapChange> {
        let (eligible, baseline): (Vec<&SlotSample>, Vec<&SlotSample>) = samples
            .iter()
            .filter(|s| s.active())
            .partition(|s| s.throttled);
        let eligible_sum: f64 = eligible.iter().map(|s| s.speed).sum();
        let baseline_sum: f64 = baseline.iter().map(|s| s.speed).sum();
        self.aggregate = eligible_sum + baseline_sum;

        let Some(ceiling) = self.ceiling else {
            return Vec::new();
        };
        let max = self.max_cap(ceiling);
        let mut changes = Vec::new();

        if self.aggregate > ceiling * self.high_water && !eligible.is_empty() {
            let budget = (ceiling - baseline_sum).max(0.0);
            let n = eligible.len() as f64;
            for s in &eligible {
                let share = if eligible_sum > 0.0 {
                    s.speed / eligible_sum
                } else {
                    1.0 / n
                };
                let target = (budget * share).clamp(self.floor, max);
                if let Some(change) = self.propose(now, s.slot, target) {
                    changes.push(change);
                }
            }
        } else if self.aggregate < ceiling * self.low_water {
            for s in &eligible {
                let Some(cap) = self.slots.get(&s.slot).and_then(|c| c.cap) else {
                    continue;
                };
                let current = cap as f64;
                if current >= max {
                    continue;
                }
                let target = (current * self.growth).clamp(self.floor, max);
                if let Some(change) = self.propose(now, s.slot, target) {
                    changes.push(change);
                }
            }
        }

        for c in &changes {
            tracing::debug!(slot = c.slot, cap = c.cap, previous = ?c.previous, "rate cap changed");
        }
        changes
    }

    /// Apply `target` to `slot` if it clears the tolerance and cooldown.
    fn propose(&mut self, now: Instant, slot: usize, target: f64) -> Option<CapChange> {
        let default_cap = self.slot_max.map(|m| m as u64);
        let tolerance = self.tolerance;
        let (down, up) = (self.down_cooldown, self.up_cooldown);
        let entry = self
            .slots
            .entry(slot)
            .or_insert_with(|| SlotCap::new(default_cap));
        let current = entry.cap.map(|c| c as f64);
        let decreasing = current.map(|c| target < c).unwrap_or(true);
        if let Some(c) = current {
            if (target - c).abs() <= tolerance * c {
                return None;
            }
        }
        let cooldown = if decreasing { down } else { up };
        if !entry.cooled_down(now, cooldown) {
            return None;
        }
        let cap = target.round() as u64;
        let previous = entry.set(cap, now);
        Some(CapChange {
            slot,
            cap,
            previous,
        })
    }
}

#[cfg(test)]
mod tests;

use std::time::{Duration, Instant};

/// Per-slot cap and the time it last changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotCap {
    pub cap: Option<u64>,
    pub last_change: Option<Instant>,
}

impl SlotCap {
    pub fn new(cap: Option<u64>) -> Self {
        Self {
            cap,
            last_change: None,
        }
    }

    pub fn cooled_down(&self, now: Instant, cooldown: Duration) -> bool {
        match self.last_change {
            Some(at) => now.saturating_duration_since(at) >= cooldown,
            None => true,
        }
    }

    /// Set a new cap; returns the previous one.
    pub fn set(&mut self, cap: u64, now: Instant) -> Option<u64> {
        self.last_change = Some(now);
        self.cap.replace(cap)
    }
}

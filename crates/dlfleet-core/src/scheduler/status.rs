//! Read-only status export for dashboards and the control socket.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::Progress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    #[default]
    Idle,
    Assigned,
    Running,
    Paused,
    Terminal,
}

/// Progress of the item a slot is downloading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemProgress {
    pub percent: Option<f64>,
    pub downloaded: Option<u64>,
    pub total: Option<u64>,
    /// Bytes per second as reported by the tool.
    pub speed: Option<f64>,
    pub eta_secs: Option<f64>,
}

impl From<Progress> for ItemProgress {
    fn from(p: Progress) -> Self {
        Self {
            percent: p.percent,
            downloaded: p.downloaded,
            total: p.total,
            speed: p.speed,
            eta_secs: p.eta.map(|d| d.as_secs_f64()),
        }
    }
}

impl ItemProgress {
    /// Fraction complete in [0.0, 1.0].
    pub fn fraction(&self) -> Option<f64> {
        if let Some(pct) = self.percent {
            return Some((pct / 100.0).clamp(0.0, 1.0));
        }
        match (self.downloaded, self.total) {
            (Some(done), Some(total)) if total > 0 => {
                Some((done as f64 / total as f64).min(1.0))
            }
            _ => None,
        }
    }

    /// Reported ETA, else remaining bytes over the current speed.
    pub fn eta(&self) -> Option<Duration> {
        if let Some(secs) = self.eta_secs {
            return Duration::try_from_secs_f64(secs).ok();
        }
        let remaining = self.total?.saturating_sub(self.downloaded?);
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let rate = self.speed.filter(|s| *s > 0.0)?;
        Duration::try_from_secs_f64(remaining as f64 / rate).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub slot: usize,
    pub state: SlotState,
    pub job: Option<String>,
    pub item: Option<String>,
    /// 1-based position of the current item among the job's pending items.
    pub item_index: usize,
    pub item_count: usize,
    pub class: Option<String>,
    pub progress: ItemProgress,
    /// Measured speed; zero while paused.
    pub speed: f64,
    pub cap: Option<u64>,
    pub assigned_secs: Option<f64>,
    pub idle_secs: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub jobs_pending: usize,
    pub jobs_claimed: usize,
    pub jobs_finished: u64,
    pub items_completed: u64,
    pub items_bad: u64,
    pub items_stalled: u64,
    pub items_retried: u64,
    pub requeues: u64,
    pub preemptions: u64,
    pub cap_changes: u64,
    pub rescans: u64,
}

/// One snapshot of the whole fleet, published every control tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub slots: Vec<SlotStatus>,
    pub aggregate_speed: f64,
    pub ceiling: Option<u64>,
    pub paused: bool,
    pub aborted: bool,
    pub totals: Totals,
    pub elapsed_secs: f64,
}

impl FleetStatus {
    /// Jobs currently held by a slot.
    pub fn active_jobs(&self) -> Vec<&str> {
        self.slots.iter().filter_map(|s| s.job.as_deref()).collect()
    }
}

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub jobs_finished: u64,
    pub items_completed: u64,
    pub items_bad: u64,
    pub items_stalled: u64,
    pub requeues: u64,
    pub preemptions: u64,
    pub aborted: bool,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_and_eta() {
        let p = ItemProgress {
            percent: None,
            downloaded: Some(50),
            total: Some(200),
            speed: Some(10.0),
            eta_secs: None,
        };
        assert_eq!(p.fraction(), Some(0.25));
        assert_eq!(p.eta(), Some(Duration::from_secs(15)));

        let p = ItemProgress {
            percent: Some(120.0),
            ..ItemProgress::default()
        };
        assert_eq!(p.fraction(), Some(1.0));
        assert_eq!(p.eta(), None);
    }

    #[test]
    fn status_json_roundtrip_shape() {
        let status = FleetStatus {
            slots: vec![SlotStatus {
                slot: 0,
                state: SlotState::Running,
                job: Some("/jobs/a.txt".into()),
                ..SlotStatus::default()
            }],
            ..FleetStatus::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"state\":\"running\""));
        let back: FleetStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.active_jobs(), vec!["/jobs/a.txt"]);
    }
}

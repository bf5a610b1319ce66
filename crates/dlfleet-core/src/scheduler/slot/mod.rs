//! Worker slots: one independent task per slot, each driving one job at a time.

mod item;
mod worker;

use std::sync::Mutex;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::backend::{BackendClass, Progress};
use crate::jobs::{ClaimedJob, JobId};
use crate::sync::lock;
use crate::throttle::SlotSample;

use super::status::{ItemProgress, SlotState, SlotStatus};

pub(crate) use worker::run_slot;

#[derive(Debug, Default)]
struct SlotRuntime {
    state: SlotState,
    job: Option<JobId>,
    item: Option<String>,
    item_index: usize,
    item_count: usize,
    class: Option<BackendClass>,
    progress: Progress,
    cap: Option<u64>,
    assigned_at: Option<Instant>,
    last_activity: Option<Instant>,
}

/// Per-slot state visible to the control loop and rescans.
#[derive(Debug)]
pub(crate) struct SlotShared {
    pub index: usize,
    runtime: Mutex<SlotRuntime>,
    /// Job a rescan asked this slot to give up.
    preempt: Mutex<Option<JobId>>,
    /// Wakes the running item to re-check preemption and its rate cap.
    pub wake: Notify,
}

impl SlotShared {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            runtime: Mutex::new(SlotRuntime::default()),
            preempt: Mutex::new(None),
            wake: Notify::new(),
        }
    }

    pub fn assign(&self, job: &ClaimedJob, item_count: usize, now: Instant) {
        let mut rt = lock(&self.runtime);
        *rt = SlotRuntime {
            state: SlotState::Assigned,
            job: Some(job.id.clone()),
            item_count,
            assigned_at: Some(now),
            last_activity: Some(now),
            ..SlotRuntime::default()
        };
    }

    pub fn begin_item(&self, item: &str, index: usize) {
        let mut rt = lock(&self.runtime);
        rt.item = Some(item.to_string());
        rt.item_index = index + 1;
        rt.progress = Progress::default();
    }

    pub fn running(&self, class: BackendClass, cap: Option<u64>, now: Instant) {
        let mut rt = lock(&self.runtime);
        rt.state = SlotState::Running;
        rt.class = Some(class);
        rt.cap = cap;
        rt.progress.speed = None;
        rt.last_activity = Some(now);
    }

    /// Child gone between attempts or items; the slot still holds its job.
    pub fn between_items(&self) {
        let mut rt = lock(&self.runtime);
        if rt.state != SlotState::Terminal {
            rt.state = SlotState::Assigned;
        }
        rt.progress.speed = None;
    }

    pub fn touch(&self, now: Instant) {
        lock(&self.runtime).last_activity = Some(now);
    }

    pub fn progress(&self, progress: Progress) {
        let mut rt = lock(&self.runtime);
        // Keep the last known value for fields this update does not carry.
        let prev = rt.progress;
        rt.progress = Progress {
            percent: progress.percent.or(prev.percent),
            downloaded: progress.downloaded.or(prev.downloaded),
            total: progress.total.or(prev.total),
            speed: progress.speed,
            eta: progress.eta,
        };
    }

    pub fn last_total(&self) -> Option<u64> {
        lock(&self.runtime).progress.total
    }

    pub fn set_paused(&self, paused: bool) {
        let mut rt = lock(&self.runtime);
        match (paused, rt.state) {
            (true, SlotState::Running) => rt.state = SlotState::Paused,
            (false, SlotState::Paused) => rt.state = SlotState::Running,
            _ => {}
        }
    }

    pub fn set_idle(&self) {
        let mut rt = lock(&self.runtime);
        *rt = SlotRuntime::default();
    }

    pub fn set_terminal(&self) {
        let mut rt = lock(&self.runtime);
        *rt = SlotRuntime {
            state: SlotState::Terminal,
            ..SlotRuntime::default()
        };
    }

    pub fn running_cap(&self) -> Option<u64> {
        lock(&self.runtime).cap
    }

    pub fn state(&self) -> SlotState {
        lock(&self.runtime).state
    }

    pub fn request_preempt(&self, job: JobId) {
        *lock(&self.preempt) = Some(job);
        self.wake.notify_one();
    }

    /// True if a preemption was requested for `job`. Clears stale requests.
    pub fn take_preempt(&self, job: &JobId) -> bool {
        match lock(&self.preempt).take() {
            Some(target) => &target == job,
            None => false,
        }
    }

    /// Throttle input for this tick. Paused slots report zero speed.
    pub fn sample(&self) -> SlotSample {
        let rt = lock(&self.runtime);
        let paused = rt.state == SlotState::Paused;
        SlotSample {
            slot: self.index,
            speed: if paused {
                0.0
            } else {
                rt.progress.speed.unwrap_or(0.0)
            },
            paused,
            downloading: matches!(rt.state, SlotState::Running | SlotState::Paused),
            throttled: rt.class.as_ref().map(|c| c.throttled).unwrap_or(false),
        }
    }

    pub fn status(&self, now: Instant) -> SlotStatus {
        let rt = lock(&self.runtime);
        let paused = rt.state == SlotState::Paused;
        let mut progress = ItemProgress::from(rt.progress);
        if paused {
            progress.speed = Some(0.0);
        }
        SlotStatus {
            slot: self.index,
            state: rt.state,
            job: rt.job.as_ref().map(|j| j.to_string()),
            item: rt.item.clone(),
            item_index: rt.item_index,
            item_count: rt.item_count,
            class: rt.class.as_ref().map(|c| c.name.clone()),
            progress,
            speed: if paused {
                0.0
            } else {
                rt.progress.speed.unwrap_or(0.0)
            },
            cap: rt.cap,
            assigned_secs: rt.assigned_at.map(|t| now.duration_since(t).as_secs_f64()),
            idle_secs: rt
                .last_activity
                .map(|t| now.duration_since(t).as_secs_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobCounts;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;

    fn claimed(name: &str) -> ClaimedJob {
        ClaimedJob {
            id: JobId::new(format!("/jobs/{}.txt", name)),
            items: vec!["https://a.test/1".into()],
            output: PathBuf::from("/out"),
            class: "yt-dlp".into(),
            counts: JobCounts::new(1),
            priority: false,
            strikes: HashMap::new(),
            bad_items: HashSet::new(),
            slot: 0,
        }
    }

    #[test]
    fn paused_slot_reports_zero_speed() {
        let slot = SlotShared::new(0);
        let now = Instant::now();
        slot.assign(&claimed("a"), 1, now);
        slot.running(
            BackendClass {
                name: "yt-dlp".into(),
                throttled: true,
            },
            None,
            now,
        );
        slot.progress(Progress {
            speed: Some(1000.0),
            downloaded: Some(10),
            ..Progress::default()
        });
        assert_eq!(slot.sample().speed, 1000.0);

        slot.set_paused(true);
        let sample = slot.sample();
        assert!(sample.paused);
        assert_eq!(sample.speed, 0.0);
        let status = slot.status(now);
        assert_eq!(status.state, SlotState::Paused);
        assert_eq!(status.speed, 0.0);
        assert_eq!(status.progress.downloaded, Some(10));

        slot.set_paused(false);
        assert_eq!(slot.state(), SlotState::Running);
    }

    #[test]
    fn stale_preemption_is_ignored() {
        let slot = SlotShared::new(1);
        let a = JobId::new("/jobs/a.txt");
        let b = JobId::new("/jobs/b.txt");
        slot.request_preempt(a.clone());
        assert!(!slot.take_preempt(&b));
        assert!(!slot.take_preempt(&a));
        slot.request_preempt(a.clone());
        assert!(slot.take_preempt(&a));
    }
}

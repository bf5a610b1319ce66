//! The job pool: every unfinished job, split into a priority and a regular tier.
//!
//! All methods are short, non-blocking data mutations; the scheduler keeps the
//! pool behind a mutex and never holds it across I/O. Finished-log appends
//! happen outside the lock, driven by the return values of [`JobPool::release`]
//! and [`JobPool::apply_estimates`].

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use rand::seq::SliceRandom;
use serde::Serialize;

use crate::archive::FinishedLog;
use crate::config::{RankConfig, Selection};

use super::estimate::{EstimateInput, RemainingEstimator};
use super::rank::compare_jobs;
use super::source::JobSource;
use super::{ClaimState, ClaimedJob, Job, JobCounts, JobId};

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolOptions {
    pub selection: Selection,
    pub rank: RankConfig,
    /// Never write to the finished-log while building.
    pub read_only: bool,
}

/// Outcome of returning a job to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Released {
    /// Back in its own tier with this many items left.
    Requeued { remaining: usize },
    /// Nothing left; the caller appends it to the finished-log.
    Finished(JobId),
    /// The pool no longer knows this job.
    Unknown,
}

/// A claimed job that should be interrupted so a better-ranked one can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preemption {
    pub slot: usize,
    pub job: JobId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub pending: usize,
    pub priority_pending: usize,
    pub claimed: usize,
    pub finished: usize,
}

/// Read-only view of a pooled job, in claim order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub class: String,
    pub priority: bool,
    pub counts: JobCounts,
    pub remaining: usize,
    pub claimed_by: Option<usize>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            class: job.class.clone(),
            priority: job.priority,
            counts: job.counts,
            remaining: job.remaining(),
            claimed_by: match job.state {
                ClaimState::Claimed(slot) => Some(slot),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct JobPool {
    jobs: BTreeMap<JobId, Job>,
    finished: HashSet<JobId>,
    options: PoolOptions,
}

/// A priority entry matches a job by absolute path, file name or file stem.
fn matches_priority(id: &JobId, entry: &str) -> bool {
    let path = id.path();
    path == Path::new(entry)
        || path
            .file_name()
            .map(|n| n.to_string_lossy() == entry)
            .unwrap_or(false)
        || id.name() == entry
}

impl JobPool {
    /// Build the pool from scanned sources.
    ///
    /// Jobs already in the finished-log are skipped. Jobs the estimator reports
    /// as having nothing left are implicitly finished and, unless the pool is
    /// read-only, logged as such.
    pub fn build(
        sources: Vec<JobSource>,
        finished_log: &FinishedLog,
        estimator: &dyn RemainingEstimator,
        priority: &[String],
        classify: impl Fn(&str) -> String,
        options: PoolOptions,
    ) -> Self {
        let mut pool = Self {
            options,
            ..Self::default()
        };
        let mut skipped = 0usize;
        for source in sources {
            if finished_log.contains(source.id.path()) {
                skipped += 1;
                continue;
            }
            let total = source.items.len();
            let estimate = estimator.remaining(&EstimateInput {
                id: &source.id,
                items: &source.items,
                output: &source.output,
            });
            if estimate == 0 {
                tracing::info!(job = %source.id, "nothing left to download, marking finished");
                if !options.read_only {
                    if let Err(e) = finished_log.append(source.id.path()) {
                        tracing::warn!(job = %source.id, "{}", e);
                    }
                }
                pool.finished.insert(source.id);
                continue;
            }
            let class = source
                .items
                .first()
                .map(|item| classify(item))
                .unwrap_or_default();
            let is_priority = priority.iter().any(|p| matches_priority(&source.id, p));
            let job = Job {
                id: source.id.clone(),
                items: source.items,
                output: source.output,
                class,
                counts: JobCounts::from_remaining(total, estimate),
                state: ClaimState::Unclaimed,
                priority: is_priority,
                strikes: Default::default(),
                bad_items: Default::default(),
            };
            pool.jobs.insert(source.id, job);
        }
        let stats = pool.stats();
        tracing::info!(
            regular = stats.pending - stats.priority_pending,
            priority = stats.priority_pending,
            already_finished = skipped,
            implicitly_finished = pool.finished.len(),
            "job pool built"
        );
        pool
    }

    fn eligible(job: &Job) -> bool {
        job.state == ClaimState::Unclaimed && job.remaining() > 0
    }

    /// Hand out the next job to `slot`, priority tier first.
    ///
    /// `avoid` is skipped when another job in the same tier is eligible.
    pub fn claim_next(&mut self, slot: usize, avoid: Option<&JobId>) -> Option<ClaimedJob> {
        let id = [true, false]
            .into_iter()
            .find_map(|tier| self.pick(tier, avoid))?;
        let job = self.jobs.get_mut(&id)?;
        job.state = ClaimState::Claimed(slot);
        Some(ClaimedJob {
            id: job.id.clone(),
            items: job.items.clone(),
            output: job.output.clone(),
            class: job.class.clone(),
            counts: job.counts,
            priority: job.priority,
            strikes: job.strikes.clone(),
            bad_items: job.bad_items.clone(),
            slot,
        })
    }

    fn pick(&self, priority: bool, avoid: Option<&JobId>) -> Option<JobId> {
        let mut eligible: Vec<&Job> = self
            .jobs
            .values()
            .filter(|j| j.priority == priority && !self.finished.contains(&j.id))
            .filter(|j| Self::eligible(j))
            .collect();
        if let Some(avoid) = avoid {
            if eligible.len() > 1 {
                eligible.retain(|j| &j.id != avoid);
            }
        }
        let chosen = match self.options.selection {
            Selection::Random => eligible.choose(&mut rand::thread_rng()).copied(),
            Selection::Ranked => eligible
                .into_iter()
                .min_by(|a, b| compare_jobs(a, b, self.options.rank)),
        };
        chosen.map(|j| j.id.clone())
    }

    /// Return a claimed job with the slot's updated counts.
    pub fn release(&mut self, claimed: ClaimedJob) -> Released {
        let Some(job) = self.jobs.get_mut(&claimed.id) else {
            return Released::Unknown;
        };
        job.counts = claimed.counts;
        job.strikes = claimed.strikes;
        job.bad_items = claimed.bad_items;
        if job.remaining() == 0 {
            job.state = ClaimState::Finished;
            self.jobs.remove(&claimed.id);
            self.finished.insert(claimed.id.clone());
            return Released::Finished(claimed.id);
        }
        job.state = ClaimState::Unclaimed;
        Released::Requeued {
            remaining: job.remaining(),
        }
    }

    /// Unclaimed jobs whose estimates a rescan should refresh.
    pub fn rescan_targets(&self) -> Vec<JobSource> {
        self.jobs
            .values()
            .filter(|j| j.state == ClaimState::Unclaimed)
            .map(|j| JobSource {
                id: j.id.clone(),
                items: j.items.clone(),
                output: j.output.clone(),
            })
            .collect()
    }

    /// Fold fresh estimates into unclaimed jobs. Jobs claimed since the
    /// snapshot are left to their slot. Returns jobs that are now finished.
    pub fn apply_estimates(&mut self, estimates: Vec<(JobId, usize)>) -> Vec<JobId> {
        let mut done = Vec::new();
        for (id, estimate) in estimates {
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            if job.state != ClaimState::Unclaimed {
                continue;
            }
            let total = job.counts.total;
            let estimate = estimate.min(total);
            job.counts = JobCounts {
                total,
                completed: total - estimate,
                bad: job.counts.bad.min(estimate),
            };
            if job.remaining() == 0 {
                self.jobs.remove(&id);
                self.finished.insert(id.clone());
                done.push(id);
            }
        }
        done
    }

    /// Claimed jobs to interrupt so the top-ranked jobs are the ones running.
    ///
    /// The top window is as wide as the claimed jobs plus `idle_slots`; idle
    /// slots absorb the first unclaimed jobs inside it, and the rest displace
    /// the worst-ranked claimed jobs outside it.
    pub fn preemption_plan(&self, idle_slots: usize) -> Vec<Preemption> {
        let order = self.claim_order();
        let claimed = order
            .iter()
            .filter(|j| matches!(j.state, ClaimState::Claimed(_)))
            .count();
        let window = (claimed + idle_slots).min(order.len());
        let waiting = order[..window]
            .iter()
            .filter(|j| j.state == ClaimState::Unclaimed)
            .count()
            .saturating_sub(idle_slots);
        order[window..]
            .iter()
            .rev()
            .filter_map(|j| match j.state {
                ClaimState::Claimed(slot) => Some(Preemption {
                    slot,
                    job: j.id.clone(),
                }),
                _ => None,
            })
            .take(waiting)
            .collect()
    }

    fn claim_order(&self) -> Vec<&Job> {
        let mut order: Vec<&Job> = self.jobs.values().filter(|j| j.remaining() > 0).collect();
        order.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| compare_jobs(a, b, self.options.rank))
        });
        order
    }

    /// No job is left in either tier, claimed or not.
    pub fn is_drained(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            finished: self.finished.len(),
            ..PoolStats::default()
        };
        for job in self.jobs.values() {
            match job.state {
                ClaimState::Unclaimed => {
                    stats.pending += 1;
                    if job.priority {
                        stats.priority_pending += 1;
                    }
                }
                ClaimState::Claimed(_) => stats.claimed += 1,
                ClaimState::Finished => {}
            }
        }
        stats
    }

    /// Every unfinished job in claim order.
    pub fn ranked(&self) -> Vec<JobView> {
        self.claim_order().into_iter().map(JobView::from).collect()
    }
}

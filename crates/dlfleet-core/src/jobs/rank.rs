//! Ranking of eligible jobs.

use std::cmp::Ordering;

use crate::config::{RankConfig, RankDirection, RankMetric};

use super::Job;

fn metric_value(job: &Job, metric: RankMetric) -> usize {
    match metric {
        RankMetric::Remaining => job.remaining(),
        RankMetric::Total => job.counts.total,
        RankMetric::Completed => job.counts.completed,
        RankMetric::Identifier => 0,
    }
}

/// Claim order: `Less` means `a` is claimed before `b`.
///
/// Ties on the metric are broken by identifier in the same direction, so the
/// order is total and stable across rescans.
pub fn compare_jobs(a: &Job, b: &Job, rank: RankConfig) -> Ordering {
    let ord = metric_value(a, rank.metric)
        .cmp(&metric_value(b, rank.metric))
        .then_with(|| a.id.cmp(&b.id));
    match rank.direction {
        RankDirection::Descending => ord.reverse(),
        RankDirection::Ascending => ord,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{ClaimState, JobCounts, JobId};
    use std::collections::{HashMap, HashSet};

    fn job(name: &str, total: usize, remaining: usize) -> Job {
        Job {
            id: JobId::new(format!("/jobs/{}.txt", name)),
            items: Vec::new(),
            output: format!("/out/{}", name).into(),
            class: "yt-dlp".into(),
            counts: JobCounts::from_remaining(total, remaining),
            state: ClaimState::Unclaimed,
            priority: false,
            strikes: HashMap::new(),
            bad_items: HashSet::new(),
        }
    }

    fn sorted(mut jobs: Vec<Job>, rank: RankConfig) -> Vec<String> {
        jobs.sort_by(|a, b| compare_jobs(a, b, rank));
        jobs.iter().map(|j| j.id.name()).collect()
    }

    #[test]
    fn most_remaining_first_by_default() {
        let jobs = vec![job("a", 5, 1), job("b", 5, 5), job("c", 5, 3)];
        assert_eq!(sorted(jobs, RankConfig::default()), vec!["b", "c", "a"]);
    }

    #[test]
    fn ascending_flips_metric_and_tiebreak() {
        let rank = RankConfig {
            metric: RankMetric::Remaining,
            direction: RankDirection::Ascending,
        };
        let jobs = vec![job("b", 4, 2), job("a", 4, 2), job("c", 9, 1)];
        assert_eq!(sorted(jobs, rank), vec!["c", "a", "b"]);
    }

    #[test]
    fn descending_ties_break_by_identifier_descending() {
        let jobs = vec![job("a", 3, 3), job("b", 3, 3)];
        assert_eq!(sorted(jobs, RankConfig::default()), vec!["b", "a"]);
    }

    #[test]
    fn identifier_metric_orders_by_path() {
        let rank = RankConfig {
            metric: RankMetric::Identifier,
            direction: RankDirection::Ascending,
        };
        let jobs = vec![job("z", 1, 1), job("m", 9, 9), job("a", 2, 2)];
        assert_eq!(sorted(jobs, rank), vec!["a", "m", "z"]);
    }

    #[test]
    fn total_metric() {
        let rank = RankConfig {
            metric: RankMetric::Total,
            direction: RankDirection::Descending,
        };
        let jobs = vec![job("a", 2, 2), job("b", 10, 1)];
        assert_eq!(sorted(jobs, rank), vec!["b", "a"]);
    }
}

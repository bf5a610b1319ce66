//! CLI for the dlfleet download fleet scheduler.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use dlfleet_core::config::{self, FleetConfig, RankDirection, RankMetric, Selection};
use std::path::PathBuf;

use commands::{run_control, run_pool, run_scheduler, run_status};
use control_socket::ControlCommand;

/// Top-level CLI for dlfleet.
#[derive(Debug, Parser)]
#[command(name = "dlfleet")]
#[command(about = "dlfleet: bounded, throttled fleet of external downloaders", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the fleet until every job finishes or the run is aborted.
    Run(RunArgs),

    /// List unfinished jobs in claim order with remaining estimates.
    Pool {
        /// Directory of job files (overrides the config).
        jobs_dir: Option<PathBuf>,
    },

    /// Show the live status of a running fleet.
    Status,

    /// Suspend every active download of a running fleet.
    Pause,

    /// Resume a paused fleet.
    Resume,

    /// Ask a running fleet to shut down; in-progress jobs are requeued.
    Abort,
}

/// Ranking metric as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RankBy {
    Remaining,
    Total,
    Completed,
    Identifier,
}

impl From<RankBy> for RankMetric {
    fn from(value: RankBy) -> Self {
        match value {
            RankBy::Remaining => RankMetric::Remaining,
            RankBy::Total => RankMetric::Total,
            RankBy::Completed => RankMetric::Completed,
            RankBy::Identifier => RankMetric::Identifier,
        }
    }
}

fn parse_rate(s: &str) -> Result<u64, String> {
    config::parse_byte_rate(s).map_err(|e| e.to_string())
}

/// Flags for `dlfleet run`. Every flag overrides the matching config key.
#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Directory of job files.
    pub jobs_dir: Option<PathBuf>,

    /// Root directory for per-job output.
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Number of worker slots.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Requeue a job after holding it this long.
    #[arg(long, value_name = "SECS")]
    pub time_limit: Option<u64>,

    /// Aggregate speed ceiling (e.g. 750000, 500K, 2M).
    #[arg(long, value_name = "BPS", value_parser = parse_rate)]
    pub max_speed: Option<u64>,

    /// Upper bound for any single slot's cap.
    #[arg(long, value_name = "BPS", value_parser = parse_rate)]
    pub slot_speed: Option<u64>,

    /// Metric used to order eligible jobs.
    #[arg(long, value_enum, value_name = "METRIC")]
    pub rank_by: Option<RankBy>,

    /// Claim the smallest metric first.
    #[arg(long)]
    pub ascending: bool,

    /// Job identifier or file stem to claim before regular jobs (repeatable).
    #[arg(long, value_name = "ID")]
    pub priority: Vec<String>,

    /// Pick uniformly among eligible jobs instead of ranking.
    #[arg(long)]
    pub random: bool,

    /// Re-estimate unclaimed jobs every SECS.
    #[arg(long, value_name = "SECS")]
    pub rescan_interval: Option<u64>,

    /// Interrupt lower-ranked jobs when better ones appear after a rescan.
    #[arg(long)]
    pub preempt: bool,

    /// Declare an item stalled after SECS without output.
    #[arg(long, value_name = "SECS")]
    pub stall_seconds: Option<u64>,

    /// Abort the whole run after SECS.
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,
}

impl RunArgs {
    /// Apply command-line overrides on top of the loaded config.
    pub fn apply(&self, cfg: &mut FleetConfig) {
        if let Some(dir) = &self.jobs_dir {
            cfg.jobs_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.output {
            cfg.output_dir = Some(dir.clone());
        }
        if let Some(n) = self.workers {
            cfg.workers = n;
        }
        if self.time_limit.is_some() {
            cfg.time_limit_secs = self.time_limit;
        }
        if self.max_speed.is_some() {
            cfg.throttle.ceiling_bytes_per_sec = self.max_speed;
        }
        if self.slot_speed.is_some() {
            cfg.throttle.slot_max_bytes_per_sec = self.slot_speed;
        }
        if let Some(metric) = self.rank_by {
            cfg.rank.metric = metric.into();
        }
        if self.ascending {
            cfg.rank.direction = RankDirection::Ascending;
        }
        if !self.priority.is_empty() {
            cfg.priority = self.priority.clone();
        }
        if self.random {
            cfg.selection = Selection::Random;
        }
        if self.rescan_interval.is_some() {
            cfg.rescan_interval_secs = self.rescan_interval;
        }
        if self.preempt {
            cfg.preempt = true;
        }
        if let Some(secs) = self.stall_seconds {
            cfg.stall_secs = secs;
        }
        if self.deadline.is_some() {
            cfg.deadline_secs = self.deadline;
        }
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Run(args) => {
                let mut cfg = config::load_or_init()?;
                args.apply(&mut cfg);
                tracing::debug!("effective config: {:?}", cfg);
                run_scheduler(cfg).await?;
            }
            CliCommand::Pool { jobs_dir } => {
                let mut cfg = config::load_or_init()?;
                if let Some(dir) = jobs_dir {
                    cfg.jobs_dir = Some(dir);
                }
                run_pool(cfg)?;
            }
            CliCommand::Status => run_status().await?,
            CliCommand::Pause => run_control(ControlCommand::Pause).await?,
            CliCommand::Resume => run_control(ControlCommand::Resume).await?,
            CliCommand::Abort => run_control(ControlCommand::Abort).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;

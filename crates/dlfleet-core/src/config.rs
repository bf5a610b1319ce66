use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Retry policy parameters for failed items (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per item (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 2.0,
            max_delay_secs: 60,
        }
    }
}

/// How an idle slot picks its next job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    #[default]
    Ranked,
    Random,
}

/// Metric used to rank eligible jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RankMetric {
    /// Estimated items still to download.
    #[default]
    Remaining,
    /// Number of items in the job file.
    Total,
    /// Items already completed.
    Completed,
    /// Job identifier only.
    Identifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankDirection {
    #[default]
    Descending,
    Ascending,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RankConfig {
    #[serde(default)]
    pub metric: RankMetric,
    #[serde(default)]
    pub direction: RankDirection,
}

/// Which collaborator estimates a job's remaining work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EstimatorKind {
    /// Items not yet recorded in the archive.
    #[default]
    Archive,
    /// Files already present in the job's output directory (best effort).
    OutputDir,
}

/// Adaptive throttle parameters. All rates are bytes per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Global ceiling on aggregate throughput (None = no ceiling, controller idle).
    pub ceiling_bytes_per_sec: Option<u64>,
    /// Per-slot cap; also the upper bound the controller grows caps back to.
    pub slot_max_bytes_per_sec: Option<u64>,
    /// Lowest cap the controller will ever assign.
    pub floor_bytes_per_sec: u64,
    /// Relative cap difference below which a change is not worth a restart.
    /// Must stay below `1 - 1/high_water` or scale-down can stall above the ceiling.
    pub tolerance: f64,
    /// Minimum seconds between two adjustments of one slot when scaling down.
    pub scale_down_cooldown_secs: f64,
    /// Minimum seconds between two adjustments of one slot when scaling up.
    pub scale_up_cooldown_secs: f64,
    /// Multiplicative growth per scale-up step. Below `high_water / low_water`.
    pub growth_factor: f64,
    /// Scale down when aggregate exceeds `ceiling * high_water`.
    pub high_water: f64,
    /// Scale up when aggregate falls below `ceiling * low_water`.
    pub low_water: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            ceiling_bytes_per_sec: None,
            slot_max_bytes_per_sec: None,
            floor_bytes_per_sec: 64 * 1024,
            tolerance: 0.03,
            scale_down_cooldown_secs: 5.0,
            scale_up_cooldown_secs: 20.0,
            growth_factor: 1.25,
            high_water: 1.05,
            low_water: 0.6,
        }
    }
}

/// One external downloader tool. Placeholders: `{item}`, `{output}`, `{rate}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Extra arguments appended when a rate cap applies (e.g. `["--limit-rate", "{rate}"]`).
    #[serde(default)]
    pub rate_args: Vec<String>,
    /// Hosts this tool handles (suffix match). Empty = fallback tool.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Whether the throttle controller may cap this tool.
    #[serde(default)]
    pub throttled: bool,
}

fn default_tools() -> Vec<ToolConfig> {
    vec![
        ToolConfig {
            name: "gallery-dl".to_string(),
            program: "gallery-dl".to_string(),
            args: vec!["-d".into(), "{output}".into(), "{item}".into()],
            rate_args: vec!["--limit-rate".into(), "{rate}".into()],
            hosts: vec!["imgur.com".into(), "reddit.com".into(), "pixiv.net".into()],
            throttled: false,
        },
        ToolConfig {
            name: "yt-dlp".to_string(),
            program: "yt-dlp".to_string(),
            args: vec![
                "--newline".into(),
                "--no-colors".into(),
                "-P".into(),
                "{output}".into(),
                "{item}".into(),
            ],
            rate_args: vec!["--limit-rate".into(), "{rate}".into()],
            hosts: Vec::new(),
            throttled: true,
        },
    ]
}

/// Global configuration loaded from `~/.config/dlfleet/config.toml`.
///
/// Scalar fields come before the table sections so the file serializes cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Number of concurrent worker slots.
    pub workers: usize,
    /// Directory of job files (one URL list per file).
    pub jobs_dir: Option<PathBuf>,
    /// Root under which each job gets `<root>/<job file stem>`.
    pub output_dir: Option<PathBuf>,
    /// Archive of completed items (default: state dir `archive.txt`).
    pub archive_path: Option<PathBuf>,
    /// Finished-log of completed jobs (default: state dir `finished.txt`).
    pub finished_log_path: Option<PathBuf>,
    /// Per-assignment time limit; the job is requeued when exceeded.
    pub time_limit_secs: Option<u64>,
    /// Seconds without any backend event before the child is killed.
    pub stall_secs: u64,
    /// Wall-clock limit for the whole run.
    pub deadline_secs: Option<u64>,
    /// Stalls of one item (across claims) before it is counted bad.
    pub max_stalls_per_item: u32,
    pub selection: Selection,
    /// Job identifiers (absolute path, file name or stem) drained before all others.
    pub priority: Vec<String>,
    pub rescan_interval_secs: Option<u64>,
    /// Interrupt lower-ranked jobs after a rescan when better ones sit unclaimed.
    pub preempt: bool,
    pub estimator: EstimatorKind,
    /// Control loop period (throttle, deadline, status export).
    pub tick_millis: u64,
    pub rank: RankConfig,
    pub retry: Option<RetryConfig>,
    pub throttle: ThrottleConfig,
    pub tools: Vec<ToolConfig>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            jobs_dir: None,
            output_dir: None,
            archive_path: None,
            finished_log_path: None,
            time_limit_secs: None,
            stall_secs: 180,
            deadline_secs: None,
            max_stalls_per_item: 3,
            selection: Selection::Ranked,
            priority: Vec::new(),
            rescan_interval_secs: None,
            preempt: false,
            estimator: EstimatorKind::Archive,
            tick_millis: 500,
            rank: RankConfig::default(),
            retry: None,
            throttle: ThrottleConfig::default(),
            tools: default_tools(),
        }
    }
}

impl FleetConfig {
    /// Reject invalid flag combinations before any slot starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.stall_secs == 0 {
            return Err(ConfigError::ZeroStallTimeout);
        }
        if self.tick_millis == 0 {
            return Err(ConfigError::ZeroTick);
        }
        if self.preempt && self.selection == Selection::Random {
            return Err(ConfigError::PreemptWithRandom);
        }
        let t = &self.throttle;
        if let Some(max) = t.slot_max_bytes_per_sec {
            if max < t.floor_bytes_per_sec {
                return Err(ConfigError::SlotMaxBelowFloor {
                    max,
                    floor: t.floor_bytes_per_sec,
                });
            }
        }
        if let Some(ceiling) = t.ceiling_bytes_per_sec {
            if ceiling < t.floor_bytes_per_sec {
                return Err(ConfigError::CeilingBelowFloor {
                    ceiling,
                    floor: t.floor_bytes_per_sec,
                });
            }
        }
        if !(t.low_water > 0.0 && t.low_water < t.high_water) {
            return Err(ConfigError::WaterMarks {
                low: t.low_water,
                high: t.high_water,
            });
        }
        if !(t.growth_factor > 1.0 && t.growth_factor < t.high_water / t.low_water) {
            return Err(ConfigError::GrowthFactor(t.growth_factor));
        }
        if !(t.tolerance > 0.0 && t.tolerance < 1.0 - 1.0 / t.high_water) {
            return Err(ConfigError::Tolerance(t.tolerance));
        }
        if self.tools.is_empty() {
            return Err(ConfigError::NoTools);
        }
        if let Some(tool) = self.tools.iter().find(|t| t.program.trim().is_empty()) {
            return Err(ConfigError::EmptyProgram(tool.name.clone()));
        }
        Ok(())
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_secs)
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn rescan_interval(&self) -> Option<Duration> {
        self.rescan_interval_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    /// Job directory from config, or the missing-directory error.
    pub fn jobs_dir(&self) -> Result<&Path, ConfigError> {
        self.jobs_dir.as_deref().ok_or(ConfigError::MissingJobsDir)
    }

    pub fn output_root(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("downloads"))
    }

    pub fn archive_path(&self) -> Result<PathBuf> {
        match &self.archive_path {
            Some(p) => Ok(p.clone()),
            None => Ok(state_dir()?.join("archive.txt")),
        }
    }

    pub fn finished_log_path(&self) -> Result<PathBuf> {
        match &self.finished_log_path {
            Some(p) => Ok(p.clone()),
            None => Ok(state_dir()?.join("finished.txt")),
        }
    }
}

/// State directory: `~/.local/state/dlfleet`.
pub fn state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlfleet")?;
    Ok(xdg_dirs.get_state_home().join("dlfleet"))
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlfleet")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FleetConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FleetConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    load_from_path(&path)
}

pub fn load_from_path(path: &Path) -> Result<FleetConfig> {
    let data =
        fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
    let cfg: FleetConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}

/// Parse a byte rate such as `750000`, `500K`, `2.5M` or `1G` (binary multiples).
pub fn parse_byte_rate(s: &str) -> Result<u64, ConfigError> {
    let trimmed = s.trim();
    let invalid = || ConfigError::InvalidRate(s.to_string());
    let upper = trimmed.to_ascii_uppercase();
    let body = upper
        .strip_suffix("B/S")
        .or_else(|| upper.strip_suffix("/S"))
        .unwrap_or(&upper);
    let body = body
        .strip_suffix("IB")
        .or_else(|| body.strip_suffix('B'))
        .unwrap_or(body);
    let (number, multiplier) = match body.chars().last() {
        Some('K') => (&body[..body.len() - 1], 1024.0),
        Some('M') => (&body[..body.len() - 1], 1024.0 * 1024.0),
        Some('G') => (&body[..body.len() - 1], 1024.0 * 1024.0 * 1024.0),
        _ => (body, 1.0),
    };
    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid());
    }
    Ok((value * multiplier).round() as u64)
}

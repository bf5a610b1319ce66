//! Line parser for downloader tool output.
//!
//! Understands yt-dlp style `[download]` progress, destination and
//! already-downloaded lines, `ERROR:` lines, and gallery-dl's bare output
//! paths. Anything else becomes a `Log` event.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use super::events::{DownloadEvent, FinishStatus, Progress};

struct Patterns {
    progress: Regex,
    destination: Regex,
    merger: Regex,
    already: Regex,
    archived: Regex,
    error: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        progress: Regex::new(
            r"^\[download\]\s+(?P<pct>\d+(?:\.\d+)?)%\s+of\s+~?\s*(?P<total>\d+(?:\.\d+)?\s*[KMGT]?i?B)(?:\s+in\s+[\d:]+)?(?:\s+at\s+(?P<speed>\d+(?:\.\d+)?\s*[KMGT]?i?B)/s)?(?:\s+at\s+Unknown speed)?(?:\s+ETA\s+(?P<eta>[\d:]+))?",
        )
        .expect("progress pattern"),
        destination: Regex::new(r"^\[\w+\] Destination: (?P<path>.+)$")
            .expect("destination pattern"),
        merger: Regex::new(r#"^\[Merger\] Merging formats into "(?P<path>.+)"$"#)
            .expect("merger pattern"),
        already: Regex::new(r"^\[download\] (?P<path>.+) has already been downloaded")
            .expect("already pattern"),
        archived: Regex::new(r"has already been recorded in (?:the )?archive")
            .expect("archive pattern"),
        error: Regex::new(r"^ERROR: (?P<msg>.+)$").expect("error pattern"),
    })
}

/// `120.5MiB` -> bytes. `i` units are powers of 1024, the rest powers of 1000.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s.find(|c: char| c.is_ascii_alphabetic())?;
    let value: f64 = s[..split].trim().parse().ok()?;
    let unit = &s[split..];
    let binary = unit.contains('i');
    let base: f64 = if binary { 1024.0 } else { 1000.0 };
    let exp = match unit.chars().next()? {
        'B' => 0,
        'K' => 1,
        'M' => 2,
        'G' => 3,
        'T' => 4,
        _ => return None,
    };
    Some((value * base.powi(exp)).round() as u64)
}

/// `01:02:03`, `02:03` or `3` -> duration.
pub fn parse_eta(s: &str) -> Option<Duration> {
    let mut secs = 0u64;
    for part in s.trim().split(':') {
        secs = secs.checked_mul(60)?.checked_add(part.parse().ok()?)?;
    }
    Some(Duration::from_secs(secs))
}

/// Turns output lines into events and remembers the evidence needed to decide
/// the terminal event once the process exits.
#[derive(Debug, Default)]
pub struct LineParser {
    completed: bool,
    already: bool,
    last_error: Option<String>,
}

impl LineParser {
    pub fn parse_line(&mut self, raw: &str) -> DownloadEvent {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            return DownloadEvent::Heartbeat;
        }
        let p = patterns();
        if let Some(c) = p.progress.captures(line) {
            let percent: Option<f64> = c["pct"].parse().ok();
            let total = parse_size(&c["total"]);
            let downloaded = match (percent, total) {
                (Some(pct), Some(total)) => Some((total as f64 * pct / 100.0).round() as u64),
                _ => None,
            };
            if percent.map(|p| p >= 100.0).unwrap_or(false) {
                self.completed = true;
            }
            return DownloadEvent::Progress(Progress {
                percent,
                downloaded,
                total,
                speed: c
                    .name("speed")
                    .and_then(|m| parse_size(m.as_str()))
                    .map(|b| b as f64),
                eta: c.name("eta").and_then(|m| parse_eta(m.as_str())),
            });
        }
        let destination = p.destination.captures(line);
        if let Some(c) = destination.or_else(|| p.merger.captures(line)) {
            return DownloadEvent::Destination {
                path: PathBuf::from(&c["path"]),
            };
        }
        if p.already.is_match(line) || p.archived.is_match(line) {
            self.already = true;
            return DownloadEvent::AlreadyExists;
        }
        if let Some(c) = p.error.captures(line) {
            self.last_error = Some(c["msg"].to_string());
            return DownloadEvent::Log {
                line: line.to_string(),
            };
        }
        // gallery-dl: "# /path" for skipped files, "/path" for downloaded ones.
        if let Some(path) = line.strip_prefix("# ") {
            if path.starts_with('/') {
                self.already = true;
                return DownloadEvent::AlreadyExists;
            }
        }
        if line.starts_with('/') {
            self.completed = true;
            return DownloadEvent::Destination {
                path: PathBuf::from(line),
            };
        }
        DownloadEvent::Log {
            line: line.to_string(),
        }
    }

    /// Terminal event once the process exited. `None` means the exit was
    /// clean but carried no evidence either way.
    pub fn finish(&self, success: bool, exit: &str) -> Option<DownloadEvent> {
        if !success {
            return Some(DownloadEvent::Finish {
                status: FinishStatus::Failed,
                error: Some(self.last_error.clone().unwrap_or_else(|| exit.to_string())),
            });
        }
        let status = if self.completed {
            FinishStatus::Completed
        } else if self.already {
            FinishStatus::AlreadyExists
        } else {
            return None;
        };
        Some(DownloadEvent::Finish {
            status,
            error: None,
        })
    }
}

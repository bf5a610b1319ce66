//! Shared fixtures for fleet integration tests.

#![allow(dead_code)]

pub mod scripted_backend;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dlfleet_core::archive::{Archive, FinishedLog};
use dlfleet_core::config::FleetConfig;
use tempfile::TempDir;

/// A job directory, output root and state files under one temp dir.
pub struct Fixture {
    pub root: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("jobs")).unwrap();
        Self { root }
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.path().join("jobs")
    }

    pub fn archive_path(&self) -> PathBuf {
        self.root.path().join("archive.txt")
    }

    pub fn finished_path(&self) -> PathBuf {
        self.root.path().join("finished.txt")
    }

    /// Write `<name>.txt` with the given items; returns the item identifiers.
    pub fn job(&self, name: &str, items: &[&str]) -> Vec<String> {
        let body: String = items.iter().map(|i| format!("{i}\n")).collect();
        fs::write(self.jobs_dir().join(format!("{name}.txt")), body).unwrap();
        items.iter().map(|i| i.to_string()).collect()
    }

    /// Items `https://example.test/<name>/<n>` for n in 0..count.
    pub fn numbered_job(&self, name: &str, count: usize) -> Vec<String> {
        let items: Vec<String> = (0..count)
            .map(|n| format!("https://example.test/{name}/{n}"))
            .collect();
        let refs: Vec<&str> = items.iter().map(String::as_str).collect();
        self.job(name, &refs)
    }

    /// Config with every path inside the fixture and a fast control tick.
    pub fn config(&self, workers: usize) -> FleetConfig {
        FleetConfig {
            workers,
            jobs_dir: Some(self.jobs_dir()),
            output_dir: Some(self.root.path().join("out")),
            archive_path: Some(self.archive_path()),
            finished_log_path: Some(self.finished_path()),
            stall_secs: 5,
            tick_millis: 20,
            ..FleetConfig::default()
        }
    }

    pub fn archive(&self) -> Archive {
        Archive::open(self.archive_path())
    }

    pub fn finished(&self) -> FinishedLog {
        FinishedLog::open(self.finished_path())
    }

    /// Raw finished-log lines, in file order, duplicates included.
    pub fn finished_lines(&self) -> Vec<String> {
        match fs::read_to_string(self.finished_path()) {
            Ok(body) => body
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Finished job names (file stems), in log order.
    pub fn finished_names(&self) -> Vec<String> {
        self.finished_lines()
            .iter()
            .filter_map(|l| stem(Path::new(l)))
            .collect()
    }
}

pub fn stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

/// Job name (`alpha` in `https://example.test/alpha/3`) of a numbered item.
pub fn job_of(item: &str) -> &str {
    item.trim_start_matches("https://example.test/")
        .split('/')
        .next()
        .unwrap_or("")
}

pub async fn within<F: std::future::Future>(secs: u64, fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .expect("fleet run did not finish in time")
}

//! `dlfleet run` – run the fleet over a directory of job files.

use anyhow::Result;
use dlfleet_core::backend::CommandBackend;
use dlfleet_core::config::FleetConfig;
use dlfleet_core::{RunSummary, Scheduler};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use super::status::render_status;
use crate::cli::control_socket;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run_scheduler(cfg: FleetConfig) -> Result<()> {
    let backend = Arc::new(CommandBackend::new(cfg.tools.clone()));
    let scheduler = Scheduler::new(cfg, backend)?;

    let interrupt = {
        let control = scheduler.control();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt: finishing current items and requeueing jobs");
                control.abort();
            }
        })
    };

    let socket_path = dlfleet_core::control::default_control_socket_path().ok();
    let listener = match &socket_path {
        Some(path) => start_listener(&scheduler, path),
        None => None,
    };

    let mut status_rx = scheduler.status();
    let printer = tokio::spawn(async move {
        let mut last_print: Option<Instant> = None;
        while status_rx.changed().await.is_ok() {
            if last_print.is_some_and(|t| t.elapsed() < PROGRESS_INTERVAL) {
                continue;
            }
            let snapshot = status_rx.borrow_and_update().clone();
            print!("{}", render_status(&snapshot));
            last_print = Some(Instant::now());
        }
    });

    let result = scheduler.run().await;

    printer.abort();
    interrupt.abort();
    if let Some(handle) = listener {
        handle.abort();
    }
    if let Some(path) = &socket_path {
        let _ = std::fs::remove_file(path);
    }

    let summary = result?;
    println!("{}", summary_line(&summary));
    Ok(())
}

fn start_listener(scheduler: &Scheduler, path: &Path) -> Option<JoinHandle<()>> {
    match control_socket::spawn_control_listener(scheduler.control(), scheduler.status(), path) {
        Ok(handle) => {
            tracing::debug!(path = %path.display(), "control socket listening");
            Some(handle)
        }
        Err(e) => {
            tracing::warn!("control socket unavailable: {:#}", e);
            None
        }
    }
}

fn summary_line(summary: &RunSummary) -> String {
    format!(
        "{} after {:.0}s: {} job(s) finished, {} item(s) downloaded, {} bad, {} stalled, {} requeue(s), {} preemption(s)",
        if summary.aborted { "Aborted" } else { "Done" },
        summary.elapsed.as_secs_f64(),
        summary.jobs_finished,
        summary.items_completed,
        summary.items_bad,
        summary.items_stalled,
        summary.requeues,
        summary.preemptions,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line_reports_abort() {
        let summary = RunSummary {
            jobs_finished: 2,
            items_completed: 9,
            aborted: true,
            elapsed: Duration::from_secs(12),
            ..RunSummary::default()
        };
        let line = summary_line(&summary);
        assert!(line.starts_with("Aborted after 12s"));
        assert!(line.contains("2 job(s) finished"));
        assert!(line.contains("9 item(s) downloaded"));
    }
}

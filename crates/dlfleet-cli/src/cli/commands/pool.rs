//! `dlfleet pool` – list unfinished jobs in claim order.

use anyhow::Result;
use dlfleet_core::backend::CommandBackend;
use dlfleet_core::config::FleetConfig;
use dlfleet_core::jobs::JobView;
use dlfleet_core::Scheduler;

pub fn run_pool(cfg: FleetConfig) -> Result<()> {
    let backend = CommandBackend::new(cfg.tools.clone());
    let jobs = Scheduler::list_pool(&cfg, &backend)?;
    if jobs.is_empty() {
        println!("No unfinished jobs.");
        return Ok(());
    }
    println!(
        "{:<4} {:<10} {:>9} {:>9} {:>6} {}",
        "PRIO", "CLASS", "REMAINING", "COMPLETED", "TOTAL", "JOB"
    );
    for job in &jobs {
        println!("{}", pool_row(job));
    }
    Ok(())
}

fn pool_row(job: &JobView) -> String {
    format!(
        "{:<4} {:<10} {:>9} {:>9} {:>6} {}",
        if job.priority { "*" } else { "" },
        job.class,
        job.remaining,
        job.counts.completed,
        job.counts.total,
        job.id
    )
}

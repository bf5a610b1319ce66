//! `dlfleet status` – query a running fleet and print its slots.

use anyhow::{Context, Result};
use dlfleet_core::scheduler::{FleetStatus, SlotState, SlotStatus};

use crate::cli::control_socket::{self, ControlCommand};

pub async fn run_status() -> Result<()> {
    let path = dlfleet_core::control::default_control_socket_path()?;
    let Some(reply) = control_socket::send(&path, ControlCommand::Status).await? else {
        println!("No dlfleet run is active.");
        return Ok(());
    };
    let status: FleetStatus = serde_json::from_str(&reply)
        .context("parse status reply from control socket")?;
    print!("{}", render_status(&status));
    Ok(())
}

fn mib(bytes: f64) -> f64 {
    bytes / 1_048_576.0
}

/// One header line plus one line per slot.
pub fn render_status(status: &FleetStatus) -> String {
    let totals = &status.totals;
    let ceiling = status
        .ceiling
        .map(|c| format!("{:.2} MiB/s", mib(c as f64)))
        .unwrap_or_else(|| "none".to_string());
    let mut out = format!(
        "{:.2} MiB/s (ceiling {}){}  jobs: {} pending, {} active, {} finished  items: {} done, {} bad, {} stalled\n",
        mib(status.aggregate_speed),
        ceiling,
        if status.paused { "  [paused]" } else { "" },
        totals.jobs_pending,
        totals.jobs_claimed,
        totals.jobs_finished,
        totals.items_completed,
        totals.items_bad,
        totals.items_stalled,
    );
    for slot in &status.slots {
        out.push_str(&render_slot(slot));
        out.push('\n');
    }
    out
}

fn render_slot(slot: &SlotStatus) -> String {
    let state = format!("{:?}", slot.state).to_lowercase();
    let Some(job) = slot.job.as_deref() else {
        return format!("  #{:<2} {}", slot.slot, state);
    };
    let pct = slot
        .progress
        .fraction()
        .map(|f| format!("{:.1}%", f * 100.0))
        .unwrap_or_else(|| "?".to_string());
    let eta = slot
        .progress
        .eta()
        .map(|d| format!("{}s", d.as_secs()))
        .unwrap_or_else(|| "?".to_string());
    let cap = slot
        .cap
        .map(|c| format!(" cap {:.2} MiB/s", mib(c as f64)))
        .unwrap_or_default();
    let item = if slot.state == SlotState::Assigned {
        String::new()
    } else {
        format!(" item {}/{}", slot.item_index, slot.item_count)
    };
    format!(
        "  #{:<2} {:<8} {}{} {} {:.2} MiB/s ETA {}{}",
        slot.slot,
        state,
        job,
        item,
        pct,
        mib(slot.speed),
        eta,
        cap
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlfleet_core::scheduler::{ItemProgress, Totals};

    #[test]
    fn renders_idle_and_running_slots() {
        let status = FleetStatus {
            slots: vec![
                SlotStatus {
                    slot: 0,
                    ..SlotStatus::default()
                },
                SlotStatus {
                    slot: 1,
                    state: SlotState::Running,
                    job: Some("alpha".into()),
                    item_index: 2,
                    item_count: 5,
                    progress: ItemProgress {
                        percent: Some(50.0),
                        ..ItemProgress::default()
                    },
                    speed: 1_048_576.0,
                    cap: Some(524_288),
                    ..SlotStatus::default()
                },
            ],
            aggregate_speed: 1_048_576.0,
            paused: true,
            totals: Totals {
                jobs_pending: 3,
                ..Totals::default()
            },
            ..FleetStatus::default()
        };
        let text = render_status(&status);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("[paused]"));
        assert!(lines[0].contains("3 pending"));
        assert!(lines[1].contains("idle"));
        assert!(lines[2].contains("alpha item 2/5 50.0%"));
        assert!(lines[2].contains("cap 0.50 MiB/s"));
    }
}

//! `dlfleet pause|resume|abort` – signal a running fleet over the control socket.

use anyhow::Result;

use crate::cli::control_socket::{self, ControlCommand};

pub async fn run_control(command: ControlCommand) -> Result<()> {
    let path = dlfleet_core::control::default_control_socket_path()?;
    match control_socket::send(&path, command).await? {
        Some(_) => println!("Sent {} to the running fleet", command.as_str()),
        None => println!("No dlfleet run is active; nothing to {}", command.as_str()),
    }
    Ok(())
}

//! Control socket: server (during `dlfleet run`) and client (for
//! `dlfleet status|pause|resume|abort`).
//! Protocol: one command per line; `status` is answered with one JSON line.

use anyhow::{Context, Result};
use dlfleet_core::control::RunControl;
use dlfleet_core::scheduler::FleetStatus;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Abort,
    Status,
}

impl ControlCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "abort" => Some(Self::Abort),
            "status" => Some(Self::Status),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Abort => "abort",
            Self::Status => "status",
        }
    }
}

/// Binds `path` and spawns a task serving control commands against `control`.
/// A stale socket file from an earlier run is replaced.
pub fn spawn_control_listener(
    control: RunControl,
    status: watch::Receiver<FleetStatus>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket: {}", path.display()))?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let control = control.clone();
                    let status = status.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, control, status).await {
                            tracing::debug!("control connection: {}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve(
    stream: UnixStream,
    control: RunControl,
    status: watch::Receiver<FleetStatus>,
) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        match ControlCommand::parse(&line) {
            Some(ControlCommand::Pause) => control.pause(),
            Some(ControlCommand::Resume) => control.resume(),
            Some(ControlCommand::Abort) => control.abort(),
            Some(ControlCommand::Status) => {
                let snapshot = status.borrow().clone();
                let mut json = serde_json::to_string(&snapshot)?;
                json.push('\n');
                write.write_all(json.as_bytes()).await?;
            }
            None => tracing::debug!(line = %line.trim(), "ignoring unknown control command"),
        }
    }
    Ok(())
}

/// Sends one command. Returns `None` when no run is listening at
/// `socket_path`; for `status` returns the JSON reply line.
pub async fn send(socket_path: &Path, command: ControlCommand) -> Result<Option<String>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(None),
        Err(e) => return Err(e).context("connect to control socket"),
    };
    let (read, mut write) = stream.into_split();
    write
        .write_all(format!("{}\n", command.as_str()).as_bytes())
        .await?;
    if command != ControlCommand::Status {
        return Ok(Some(String::new()));
    }
    let mut lines = BufReader::new(read).lines();
    let reply = lines
        .next_line()
        .await?
        .context("control socket closed without a status reply")?;
    Ok(Some(reply))
}

//! Run control: the abort token and global pause flag.
//!
//! A single `RunControl` is created per run and cloned into the scheduler
//! context, the CLI's control socket and the Ctrl-C handler. Slots poll the
//! abort token at every safe point and watch the pause flag while a child runs.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared abort/pause handle. Cheap to clone; all clones control the same run.
#[derive(Clone)]
pub struct RunControl {
    abort: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (pause, _) = watch::channel(false);
        Self {
            abort: CancellationToken::new(),
            pause: Arc::new(pause),
        }
    }

    /// Request a cooperative shutdown. Idempotent.
    pub fn abort(&self) {
        if !self.abort.is_cancelled() {
            tracing::info!("abort requested");
        }
        self.abort.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Resolves once abort has been requested.
    pub async fn aborted(&self) {
        self.abort.cancelled().await
    }

    /// Suspend every active child process; idle slots stop claiming.
    pub fn pause(&self) {
        if !self.pause.send_replace(true) {
            tracing::info!("pause requested");
        }
    }

    pub fn resume(&self) {
        if self.pause.send_replace(false) {
            tracing::info!("resume requested");
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    pub fn subscribe_pause(&self) -> watch::Receiver<bool> {
        self.pause.subscribe()
    }
}

/// Default path for the control socket (same XDG state dir as the archive).
pub fn default_control_socket_path() -> anyhow::Result<PathBuf> {
    Ok(crate::config::state_dir()?.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_shared_between_clones() {
        let control = RunControl::new();
        let other = control.clone();
        assert!(!other.is_aborted());
        control.abort();
        control.abort();
        assert!(other.is_aborted());
    }

    #[tokio::test]
    async fn pause_and_resume_notify_subscribers() {
        let control = RunControl::new();
        let mut rx = control.subscribe_pause();
        assert!(!*rx.borrow());

        control.pause();
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(control.is_paused());

        control.resume();
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }
}

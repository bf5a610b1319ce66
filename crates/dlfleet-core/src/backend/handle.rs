use std::io;

use tokio::sync::mpsc;

use super::events::DownloadEvent;
use super::process::ProcessController;

/// A running download: the event stream plus control over its process.
///
/// Dropping the handle terminates the process unless [`terminate`] already did.
///
/// [`terminate`]: DownloadHandle::terminate
pub struct DownloadHandle {
    events: mpsc::Receiver<DownloadEvent>,
    process: Box<dyn ProcessController>,
    terminated: bool,
}

impl DownloadHandle {
    pub fn new(events: mpsc::Receiver<DownloadEvent>, process: Box<dyn ProcessController>) -> Self {
        Self {
            events,
            process,
            terminated: false,
        }
    }

    /// Next event; `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        self.events.recv().await
    }

    pub fn suspend(&self) -> io::Result<()> {
        self.process.suspend()
    }

    pub fn resume(&self) -> io::Result<()> {
        self.process.resume()
    }

    pub fn terminate(&mut self) -> io::Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        self.events.close();
        self.process.terminate()
    }
}

impl Drop for DownloadHandle {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            tracing::debug!("terminate on drop: {}", e);
        }
    }
}

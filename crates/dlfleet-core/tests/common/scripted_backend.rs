//! In-process downloader backend that plays scripted event sequences.
//!
//! Each item gets a queue of plans; every `download` call pops the next plan
//! (or uses the default plan when the queue is empty). The fake process
//! honours suspend (playback stops) and terminate (playback ends).

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dlfleet_core::backend::{
    BackendClass, DownloadEvent, DownloadHandle, DownloadRequest, DownloaderBackend,
    FinishStatus, ProcessController, Progress,
};
use dlfleet_core::SpawnError;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum Step {
    /// Progress event at this percent.
    Progress(f64),
    /// Progress event reporting this speed in bytes per second.
    Rate(f64),
    Sleep(Duration),
    /// Emit nothing more until terminated.
    Hang,
    Finish(FinishStatus),
    Fail(String),
    /// End the stream without a terminal event.
    Close,
}

#[derive(Debug, Clone)]
pub enum Plan {
    Steps(Vec<Step>),
    SpawnFail,
}

/// One `download` call as the backend saw it.
#[derive(Debug, Clone)]
pub struct Call {
    pub item: String,
    pub output: PathBuf,
    pub rate_limit: Option<u64>,
}

#[derive(Default)]
struct Shared {
    plans: HashMap<String, VecDeque<Plan>>,
    calls: Vec<Call>,
    /// Active downloads per output directory.
    active: HashMap<PathBuf, usize>,
    max_active_per_output: usize,
    suspends: usize,
    resumes: usize,
}

pub struct ScriptedBackend {
    shared: Arc<Mutex<Shared>>,
    default_plan: Vec<Step>,
    throttled: bool,
}

impl ScriptedBackend {
    /// Every item reports some progress after `delay`, then completes.
    pub fn new(delay: Duration) -> Self {
        Self {
            shared: Arc::default(),
            default_plan: vec![
                Step::Progress(50.0),
                Step::Sleep(delay),
                Step::Finish(FinishStatus::Completed),
            ],
            throttled: false,
        }
    }

    /// Plan used for any attempt without a scripted plan.
    pub fn with_default(mut self, steps: Vec<Step>) -> Self {
        self.default_plan = steps;
        self
    }

    pub fn throttled(mut self) -> Self {
        self.throttled = true;
        self
    }

    /// Queue plans for `item`, consumed one per download attempt.
    pub fn script(&self, item: &str, plans: Vec<Plan>) {
        let mut shared = self.shared.lock().unwrap();
        shared
            .plans
            .entry(item.to_string())
            .or_default()
            .extend(plans);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.lock().unwrap().calls.clone()
    }

    pub fn attempts(&self, item: &str) -> usize {
        self.calls().iter().filter(|c| c.item == item).count()
    }

    /// Order in which items were first started.
    pub fn first_starts(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for call in self.calls() {
            if !seen.contains(&call.item) {
                seen.push(call.item);
            }
        }
        seen
    }

    pub fn max_active_per_output(&self) -> usize {
        self.shared.lock().unwrap().max_active_per_output
    }

    pub fn suspends(&self) -> usize {
        self.shared.lock().unwrap().suspends
    }

    pub fn resumes(&self) -> usize {
        self.shared.lock().unwrap().resumes
    }
}

struct FakeProcess {
    shared: Arc<Mutex<Shared>>,
    paused: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
}

impl ProcessController for FakeProcess {
    fn suspend(&self) -> io::Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        self.shared.lock().unwrap().suspends += 1;
        Ok(())
    }

    fn resume(&self) -> io::Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        self.shared.lock().unwrap().resumes += 1;
        Ok(())
    }

    fn terminate(&self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Decrements the active count for an output directory exactly once.
struct ActiveGuard {
    shared: Arc<Mutex<Shared>>,
    output: Option<PathBuf>,
}

impl ActiveGuard {
    fn release(&mut self) {
        if let Some(output) = self.output.take() {
            let mut shared = self.shared.lock().unwrap();
            if let Some(n) = shared.active.get_mut(&output) {
                *n = n.saturating_sub(1);
            }
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl DownloaderBackend for ScriptedBackend {
    fn class_of(&self, _item: &str) -> BackendClass {
        BackendClass {
            name: "scripted".into(),
            throttled: self.throttled,
        }
    }

    fn download(&self, req: &DownloadRequest) -> Result<DownloadHandle, SpawnError> {
        let plan = {
            let mut shared = self.shared.lock().unwrap();
            shared.calls.push(Call {
                item: req.item.clone(),
                output: req.output.clone(),
                rate_limit: req.rate_limit,
            });
            shared
                .plans
                .get_mut(&req.item)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| Plan::Steps(self.default_plan.clone()))
        };
        let steps = match plan {
            Plan::SpawnFail => {
                return Err(SpawnError {
                    program: "scripted".into(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such tool"),
                })
            }
            Plan::Steps(steps) => steps,
        };

        {
            let mut shared = self.shared.lock().unwrap();
            let n = shared.active.entry(req.output.clone()).or_insert(0);
            *n += 1;
            let n = *n;
            shared.max_active_per_output = shared.max_active_per_output.max(n);
        }
        let guard = ActiveGuard {
            shared: Arc::clone(&self.shared),
            output: Some(req.output.clone()),
        };

        let (tx, rx) = mpsc::channel(16);
        let paused = Arc::new(AtomicBool::new(false));
        let killed = Arc::new(AtomicBool::new(false));
        tokio::spawn(play(steps, tx, Arc::clone(&paused), Arc::clone(&killed), guard));
        let process = FakeProcess {
            shared: Arc::clone(&self.shared),
            paused,
            killed,
        };
        Ok(DownloadHandle::new(rx, Box::new(process)))
    }
}

async fn play(
    steps: Vec<Step>,
    tx: mpsc::Sender<DownloadEvent>,
    paused: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
    mut guard: ActiveGuard,
) {
    if tx.send(DownloadEvent::Start).await.is_err() {
        return;
    }
    for step in steps {
        while paused.load(Ordering::SeqCst) && !killed.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if killed.load(Ordering::SeqCst) {
            return;
        }
        let event = match step {
            Step::Progress(percent) => DownloadEvent::Progress(Progress {
                percent: Some(percent),
                total: Some(1000),
                speed: Some(1000.0),
                ..Progress::default()
            }),
            Step::Rate(speed) => DownloadEvent::Progress(Progress {
                percent: Some(10.0),
                speed: Some(speed),
                ..Progress::default()
            }),
            Step::Sleep(d) => {
                tokio::time::sleep(d).await;
                continue;
            }
            Step::Hang => {
                tx.closed().await;
                return;
            }
            Step::Finish(status) => {
                guard.release();
                DownloadEvent::Finish {
                    status,
                    error: None,
                }
            }
            Step::Fail(error) => {
                guard.release();
                DownloadEvent::Finish {
                    status: FinishStatus::Failed,
                    error: Some(error),
                }
            }
            Step::Close => {
                guard.release();
                return;
            }
        };
        if tx.send(event).await.is_err() {
            return;
        }
    }
}

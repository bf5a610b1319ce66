//! Backend that runs a configured external tool per item.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::config::ToolConfig;
use crate::error::SpawnError;

use super::events::DownloadEvent;
use super::handle::DownloadHandle;
use super::parse::LineParser;
use super::process::ChildProcess;
use super::{BackendClass, DownloadRequest, DownloaderBackend};

const EVENT_BUFFER: usize = 64;
const DRAIN_GRACE: Duration = Duration::from_secs(2);

pub struct CommandBackend {
    tools: Vec<ToolConfig>,
}

fn host_matches(host: &str, pattern: &str) -> bool {
    let pattern = pattern.trim_start_matches('.');
    host == pattern || host.ends_with(&format!(".{}", pattern))
}

impl CommandBackend {
    /// `tools` must be non-empty; config validation guarantees this.
    pub fn new(tools: Vec<ToolConfig>) -> Self {
        Self { tools }
    }

    /// First tool whose host list matches the item's host; otherwise the last
    /// tool without hosts; otherwise the last tool.
    pub fn tool_for(&self, item: &str) -> Option<&ToolConfig> {
        let host = url::Url::parse(item)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));
        if let Some(host) = host {
            if let Some(tool) = self
                .tools
                .iter()
                .find(|t| t.hosts.iter().any(|p| host_matches(&host, p)))
            {
                return Some(tool);
            }
        }
        self.tools
            .iter()
            .rev()
            .find(|t| t.hosts.is_empty())
            .or_else(|| self.tools.last())
    }

    /// Program arguments with placeholders expanded.
    pub fn command_line(tool: &ToolConfig, request: &DownloadRequest) -> Vec<String> {
        let output = request.output.to_string_lossy();
        let rate = request.rate_limit.filter(|_| tool.throttled);
        let expand = |arg: &String| {
            let arg = arg
                .replace("{item}", &request.item)
                .replace("{output}", &output);
            match rate {
                Some(r) => arg.replace("{rate}", &r.to_string()),
                None => arg,
            }
        };
        let mut args: Vec<String> = tool.args.iter().map(expand).collect();
        if rate.is_some() {
            args.extend(tool.rate_args.iter().map(expand));
        }
        args
    }
}

impl DownloaderBackend for CommandBackend {
    fn class_of(&self, item: &str) -> BackendClass {
        match self.tool_for(item) {
            Some(tool) => BackendClass {
                name: tool.name.clone(),
                throttled: tool.throttled,
            },
            None => BackendClass {
                name: String::new(),
                throttled: false,
            },
        }
    }

    fn download(&self, request: &DownloadRequest) -> Result<DownloadHandle, SpawnError> {
        let tool = self.tool_for(&request.item).ok_or_else(|| SpawnError {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no tool configured"),
        })?;
        let args = Self::command_line(tool, request);
        if let Err(e) = std::fs::create_dir_all(&request.output) {
            tracing::warn!(output = %request.output.display(), "cannot create output dir: {}", e);
        }
        tracing::debug!(tool = %tool.name, item = %request.item, ?args, "spawning");

        let mut child = Command::new(&tool.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError {
                program: tool.program.clone(),
                source,
            })?;

        let pid = child.id().unwrap_or(0);
        let exited = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (line_tx, line_rx) = mpsc::channel::<String>(EVENT_BUFFER);
        if let Some(out) = child.stdout.take() {
            tokio::spawn(forward_lines(out, line_tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(forward_lines(err, line_tx.clone()));
        }
        drop(line_tx);
        tokio::spawn(supervise(child, line_rx, tx, exited.clone()));

        Ok(DownloadHandle::new(rx, Box::new(ChildProcess::new(pid, exited))))
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        // Progress bars redraw with carriage returns.
        for part in line.split('\r') {
            if tx.send(part.to_string()).await.is_err() {
                return;
            }
        }
    }
}

/// Forward parsed events until the child exits, drain what is still buffered
/// in its pipes, then emit the terminal event if the exit carried evidence.
///
/// Grandchildren that inherit the pipes can keep them open after the tool
/// itself exits; the drain is bounded so they cannot hold the item open.
async fn supervise(
    mut child: Child,
    mut lines: mpsc::Receiver<String>,
    tx: mpsc::Sender<DownloadEvent>,
    exited: Arc<AtomicBool>,
) {
    let mut parser = LineParser::default();
    let _ = tx.send(DownloadEvent::Start).await;
    let mut open = true;
    let status = loop {
        tokio::select! {
            line = lines.recv(), if open => match line {
                Some(line) => {
                    let _ = tx.send(parser.parse_line(&line)).await;
                }
                None => open = false,
            },
            status = child.wait() => break status,
        }
    };
    exited.store(true, Ordering::Release);

    let grace = tokio::time::sleep(DRAIN_GRACE);
    tokio::pin!(grace);
    while open {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => {
                    let _ = tx.send(parser.parse_line(&line)).await;
                }
                None => open = false,
            },
            _ = &mut grace => break,
        }
    }

    let (success, exit) = match status {
        Ok(s) => (s.success(), s.to_string()),
        Err(e) => (false, format!("wait failed: {}", e)),
    };
    if let Some(event) = parser.finish(success, &exit) {
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FinishStatus;
    use std::path::PathBuf;

    fn tool(name: &str, hosts: &[&str], throttled: bool) -> ToolConfig {
        ToolConfig {
            name: name.into(),
            program: name.into(),
            args: vec!["-o".into(), "{output}".into(), "{item}".into()],
            rate_args: vec!["--rate".into(), "{rate}".into()],
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            throttled,
        }
    }

    fn request(item: &str, rate: Option<u64>) -> DownloadRequest {
        DownloadRequest {
            item: item.into(),
            output: PathBuf::from("/out/job"),
            rate_limit: rate,
        }
    }

    #[test]
    fn tool_selection_by_host() {
        let backend = CommandBackend::new(vec![
            tool("gallery", &["imgur.com"], false),
            tool("video", &[], true),
        ]);
        assert_eq!(
            backend.class_of("https://i.imgur.com/x.png").name,
            "gallery"
        );
        assert_eq!(backend.class_of("https://imgur.com/a/b").name, "gallery");
        assert_eq!(backend.class_of("https://notimgur.com/a").name, "video");
        assert_eq!(backend.class_of("not a url").name, "video");
        assert!(backend.class_of("https://youtube.com/watch?v=1").throttled);
    }

    #[test]
    fn rate_args_only_for_throttled_tools() {
        let video = tool("video", &[], true);
        let args = CommandBackend::command_line(&video, &request("https://v.test/1", Some(1024)));
        assert_eq!(
            args,
            vec!["-o", "/out/job", "https://v.test/1", "--rate", "1024"]
        );
        let args = CommandBackend::command_line(&video, &request("https://v.test/1", None));
        assert_eq!(args, vec!["-o", "/out/job", "https://v.test/1"]);
        let gallery = tool("gallery", &["g.test"], false);
        let args = CommandBackend::command_line(&gallery, &request("https://g.test/1", Some(1024)));
        assert_eq!(args.len(), 3);
    }

    #[cfg(unix)]
    fn sh(script: &str) -> CommandBackend {
        CommandBackend::new(vec![ToolConfig {
            name: "sh".into(),
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "sh".into(), "{item}".into()],
            rate_args: Vec::new(),
            hosts: Vec::new(),
            throttled: false,
        }])
    }

    #[cfg(unix)]
    async fn collect(backend: &CommandBackend) -> Vec<DownloadEvent> {
        let dir = tempfile::tempdir().unwrap();
        let req = DownloadRequest {
            item: "https://x.test/1".into(),
            output: dir.path().to_path_buf(),
            rate_limit: None,
        };
        let mut handle = backend.download(&req).unwrap();
        let mut events = Vec::new();
        while let Some(ev) = tokio::time::timeout(Duration::from_secs(10), handle.next_event())
            .await
            .unwrap()
        {
            events.push(ev);
        }
        events
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_exit_with_evidence_completes() {
        let backend = sh("echo '[download]  10.0% of 1.00KiB'; echo '[download] 100% of 1.00KiB'");
        let events = collect(&backend).await;
        assert_eq!(events.first(), Some(&DownloadEvent::Start));
        assert_eq!(
            events.last(),
            Some(&DownloadEvent::Finish {
                status: FinishStatus::Completed,
                error: None
            })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_exit_without_evidence_has_no_terminal_event() {
        let events = collect(&sh("echo hello")).await;
        assert!(events.iter().all(|e| !e.is_terminal()));
        assert!(events.contains(&DownloadEvent::Log {
            line: "hello".into()
        }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_fails() {
        let events = collect(&sh("echo 'ERROR: boom' >&2; exit 3")).await;
        assert_eq!(
            events.last(),
            Some(&DownloadEvent::Finish {
                status: FinishStatus::Failed,
                error: Some("boom".into())
            })
        );
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let backend = CommandBackend::new(vec![tool("definitely-not-a-real-tool-xyz", &[], false)]);
        let dir = tempfile::tempdir().unwrap();
        let req = DownloadRequest {
            item: "https://x.test/1".into(),
            output: dir.path().join("out"),
            rate_limit: None,
        };
        let err = backend.download(&req).err().unwrap();
        assert_eq!(err.program, "definitely-not-a-real-tool-xyz");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_ends_the_stream() {
        let backend = sh("echo started; sleep 30");
        let dir = tempfile::tempdir().unwrap();
        let req = DownloadRequest {
            item: "https://x.test/1".into(),
            output: dir.path().to_path_buf(),
            rate_limit: None,
        };
        let mut handle = backend.download(&req).unwrap();
        assert_eq!(handle.next_event().await, Some(DownloadEvent::Start));
        handle.terminate().unwrap();
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while handle.next_event().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }
}

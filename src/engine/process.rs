//! Ownership of the external analysis process.
//!
//! The supervisor hands out a cloneable [`CommandSender`] for the input
//! stream and one [`LineReader`] per output stream. Readers check the shared
//! `running` flag and the process liveness before every blocking read.

use crate::engine::config::ProcessConfig;
use crate::engine::error::EngineError;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

const EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
enum Liveness {
    Child(Arc<std::sync::Mutex<Child>>),
    /// In-process pipes; only EOF signals the end.
    Detached,
}

impl Liveness {
    /// `Some(status)` once the process has exited.
    fn exit_status(&self) -> Option<String> {
        match self {
            Liveness::Child(child) => {
                let mut child = match child.lock() {
                    Ok(c) => c,
                    Err(poisoned) => poisoned.into_inner(),
                };
                match child.try_wait() {
                    Ok(Some(status)) => Some(status.to_string()),
                    Ok(None) => None,
                    Err(e) => Some(format!("unknown ({e})")),
                }
            }
            Liveness::Detached => None,
        }
    }
}

/// Writes command lines to the process. Cheap to clone.
#[derive(Clone)]
pub struct CommandSender {
    stdin: Arc<Mutex<Option<BoxedWriter>>>,
    liveness: Liveness,
    sent: Arc<AtomicU64>,
}

impl CommandSender {
    pub async fn send(&self, line: &str) -> Result<(), EngineError> {
        if self.liveness.exit_status().is_some() {
            return Err(EngineError::ProcessUnavailable);
        }
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(EngineError::ProcessUnavailable)?;

        let line = line.trim_end();
        debug!(target: "gtp", "> {line}");
        // 応答より先に数えておく (読み取り側が古い出力を捨てる基準)
        self.sent.fetch_add(1, Ordering::SeqCst);

        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        let written = async {
            stdin.write_all(buf.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        written.map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => EngineError::ProcessUnavailable,
            _ => EngineError::Io(e),
        })
    }

    /// Number of lines handed to the process so far.
    pub fn commands_sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(e) = stdin.shutdown().await {
                debug!("closing engine stdin: {e}");
            }
        }
    }
}

/// Blocking line source for one output stream.
pub struct LineReader {
    stream: &'static str,
    lines: Lines<BufReader<BoxedReader>>,
    liveness: Liveness,
    running: Arc<AtomicBool>,
}

impl LineReader {
    pub fn stream(&self) -> &'static str {
        self.stream
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Next non-empty trimmed line. `Ok(None)` after shutdown; a process that
    /// disappears while still running is [`EngineError::ProcessTerminated`].
    pub async fn next_line(&mut self) -> Result<Option<String>, EngineError> {
        loop {
            if !self.is_running() {
                return Ok(None);
            }
            if let Some(status) = self.liveness.exit_status() {
                return Err(EngineError::ProcessTerminated {
                    stream: self.stream,
                    status,
                });
            }
            match self.lines.next_line().await? {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    return Ok(Some(line.to_string()));
                }
                None if !self.is_running() => return Ok(None),
                None => {
                    let status = self
                        .liveness
                        .exit_status()
                        .unwrap_or_else(|| "stream closed".to_string());
                    return Err(EngineError::ProcessTerminated {
                        stream: self.stream,
                        status,
                    });
                }
            }
        }
    }
}

pub struct ProcessSupervisor {
    sender: CommandSender,
    running: Arc<AtomicBool>,
    stdout: Option<LineReader>,
    stderr: Option<LineReader>,
    child: Option<Arc<std::sync::Mutex<Child>>>,
}

impl ProcessSupervisor {
    /// Arguments after the executable path.
    pub fn command_args(cfg: &ProcessConfig) -> Vec<String> {
        let mut args = vec![
            cfg.mode.clone(),
            "-config".to_string(),
            cfg.config_path.display().to_string(),
            "-model".to_string(),
            cfg.model_path.display().to_string(),
        ];
        if let Some(kv) = &cfg.override_config {
            args.push("-override-config".to_string());
            args.push(kv.clone());
        }
        args
    }

    pub fn spawn(cfg: &ProcessConfig) -> Result<Self, EngineError> {
        let args = Self::command_args(cfg);
        info!(
            "starting analysis process: {} {}",
            cfg.executable.display(),
            args.join(" ")
        );
        let mut child = Command::new(&cfg.executable)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: cfg.executable.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(EngineError::ProcessUnavailable)?;
        let stdout = child.stdout.take().ok_or(EngineError::ProcessUnavailable)?;
        let stderr = child.stderr.take().ok_or(EngineError::ProcessUnavailable)?;
        let child = Arc::new(std::sync::Mutex::new(child));

        Ok(Self::assemble(
            Box::new(stdin),
            Box::new(stdout),
            Box::new(stderr),
            Liveness::Child(Arc::clone(&child)),
            Some(child),
        ))
    }

    /// Supervisor over arbitrary streams, e.g. `tokio::io::duplex` pipes
    /// standing in for a real engine.
    pub fn from_streams(stdin: BoxedWriter, stdout: BoxedReader, stderr: BoxedReader) -> Self {
        Self::assemble(stdin, stdout, stderr, Liveness::Detached, None)
    }

    fn assemble(
        stdin: BoxedWriter,
        stdout: BoxedReader,
        stderr: BoxedReader,
        liveness: Liveness,
        child: Option<Arc<std::sync::Mutex<Child>>>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let reader = |stream: &'static str, r: BoxedReader| LineReader {
            stream,
            lines: BufReader::new(r).lines(),
            liveness: liveness.clone(),
            running: Arc::clone(&running),
        };
        let stdout = reader("stdout", stdout);
        let stderr = reader("stderr", stderr);
        ProcessSupervisor {
            sender: CommandSender {
                stdin: Arc::new(Mutex::new(Some(stdin))),
                liveness: liveness.clone(),
                sent: Arc::new(AtomicU64::new(0)),
            },
            running,
            stdout: Some(stdout),
            stderr: Some(stderr),
            child,
        }
    }

    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    pub async fn send(&self, line: &str) -> Result<(), EngineError> {
        self.sender.send(line).await
    }

    pub fn take_stdout(&mut self) -> Option<LineReader> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<LineReader> {
        self.stderr.take()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the readers, closes stdin and reaps the process, killing it if
    /// it does not exit within the grace period.
    pub async fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.sender.close().await;

        let Some(child) = self.child.take() else {
            return;
        };
        let deadline = tokio::time::Instant::now() + EXIT_GRACE;
        loop {
            let exited = {
                let mut c = match child.lock() {
                    Ok(c) => c,
                    Err(poisoned) => poisoned.into_inner(),
                };
                match c.try_wait() {
                    Ok(Some(status)) => {
                        info!("analysis process exited: {status}");
                        true
                    }
                    Ok(None) if tokio::time::Instant::now() >= deadline => {
                        warn!("analysis process did not exit, killing it");
                        if let Err(e) = c.start_kill() {
                            warn!("kill failed: {e}");
                        }
                        true
                    }
                    Ok(None) => false,
                    Err(e) => {
                        warn!("waiting for analysis process: {e}");
                        true
                    }
                }
            };
            if exited {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Drains stderr into the log until shutdown or process exit.
pub async fn drain_stderr(mut reader: LineReader) -> Result<(), EngineError> {
    while let Some(line) = reader.next_line().await? {
        debug!(target: "engine::stderr", "{line}");
    }
    debug!("stderr reader stopped");
    Ok(())
}

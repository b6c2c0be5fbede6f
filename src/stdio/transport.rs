//! Child process transport.
//!
//! [`StdioTransport`] exclusively owns one live MCP server process and its
//! three standard streams:
//!
//! - **stdin**: request frames are written here and flushed one at a time.
//! - **stdout**: driven by a [`FramedRead`] over [`FrameCodec`]; one line
//!   per response frame.
//! - **stderr**: diagnostics only. A background pump drains it line by line
//!   into a bounded tail buffer so the child never stalls on a full pipe,
//!   and forwards every line to `tracing` under the `child_stderr` target.
//!   Lines are capped at the same length as stdout frames.
//!
//! The process is launched with `kill_on_drop(true)`; dropping a transport
//! that was never terminated still reaps the child.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec};
use tracing::{debug, info, warn};

use crate::stdio::codec::{FrameCodec, MAX_LINE_BYTES};
use crate::{AppError, Result};

/// Number of stderr lines retained for diagnostics.
pub const STDERR_TAIL_LINES: usize = 64;

/// Upper bound on reaping a child after it has been sent a kill signal.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Command line used to launch the MCP server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Interpreter or executable (e.g. `python3`).
    pub program: String,
    /// Script passed as the first argument, when the program needs one.
    pub script: Option<PathBuf>,
    /// Extra arguments appended after the script.
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// Render the full command line for logging.
    #[must_use]
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        if let Some(script) = &self.script {
            parts.push(script.display().to_string());
        }
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// How a terminated child went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// Final exit status, if it could be collected.
    pub status: Option<ExitStatus>,
    /// `true` when the grace period elapsed and the child was killed.
    pub forced: bool,
}

/// Exclusive owner of one MCP server child process.
#[derive(Debug)]
pub struct StdioTransport {
    child: Child,
    pid: u32,
    stdin: Option<ChildStdin>,
    stdout: FramedRead<ChildStdout, FrameCodec>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_pump: Option<JoinHandle<()>>,
    exit: Option<ExitReport>,
}

impl StdioTransport {
    /// Launch the server with stdin, stdout, and stderr all piped.
    ///
    /// Must be called from within a tokio runtime; the stderr pump is a
    /// spawned task.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn("executable '…' not found …")`: the program does
    ///   not exist or is not on `PATH`.
    /// - `AppError::Spawn("failed to launch …")`: any other OS refusal.
    pub fn spawn(spec: &LaunchSpec) -> Result<Self> {
        let mut cmd = Command::new(&spec.program);
        if let Some(script) = &spec.script {
            cmd.arg(script);
        }
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AppError::Spawn(format!("executable '{}' not found: {err}", spec.program))
            } else {
                AppError::Spawn(format!("failed to launch '{}': {err}", spec.display()))
            }
        })?;

        // A missing pipe leaves `child` to be reaped by kill_on_drop.
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture server stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture server stderr".into()))?;

        let pid = child.id().unwrap_or(0);
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_pump = spawn_stderr_pump(pid, stderr, Arc::clone(&stderr_tail));

        info!(pid, command = %spec.display(), "mcp server process spawned");

        Ok(Self {
            child,
            pid,
            stdin: Some(stdin),
            stdout: FramedRead::new(stdout, FrameCodec::new()),
            stderr_tail,
            stderr_pump: Some(stderr_pump),
            exit: None,
        })
    }

    /// OS process id of the child (0 if the OS did not report one).
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit code of the child, if it has already exited with one.
    ///
    /// Returns `None` while the child is running, when it was killed by a
    /// signal, or when its status cannot be polled.
    pub fn exit_code(&mut self) -> Option<i32> {
        if let Some(report) = self.exit {
            return report.status.and_then(|s| s.code());
        }
        match self.child.try_wait() {
            Ok(Some(status)) => status.code(),
            Ok(None) => None,
            Err(err) => {
                warn!(pid = self.pid, %err, "failed to poll server process status");
                None
            }
        }
    }

    /// Wait up to `budget` for the child to exit and report its exit code.
    ///
    /// Used after stdout EOF, when the process is usually already on its way
    /// out but may not have been reaped yet.
    pub async fn wait_exit_code(&mut self, budget: Duration) -> Option<i32> {
        if self.exit.is_some() {
            return self.exit_code();
        }
        match tokio::time::timeout(budget, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(err)) => {
                warn!(pid = self.pid, %err, "failed to wait for server process");
                None
            }
            Err(_) => None,
        }
    }

    /// `true` while the child has not exited and has not been terminated.
    pub fn is_alive(&mut self) -> bool {
        self.exit.is_none() && matches!(self.child.try_wait(), Ok(None))
    }

    /// Write one complete frame to stdin and flush.
    ///
    /// # Errors
    ///
    /// Returns `AppError::TransportClosed` if stdin is closed, the process
    /// has exited, or the write itself fails.
    pub async fn write_line(&mut self, frame: &[u8]) -> Result<()> {
        if self.exit.is_some() {
            return Err(AppError::TransportClosed(
                "server process already terminated".into(),
            ));
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            return Err(AppError::TransportClosed(format!(
                "server process exited ({status})"
            )));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::TransportClosed("stdin already closed".into()))?;

        stdin.write_all(frame).await.map_err(|e| {
            warn!(pid = self.pid, error = %e, "write to server stdin failed");
            AppError::TransportClosed(format!("write failed: {e}"))
        })?;
        stdin
            .flush()
            .await
            .map_err(|e| AppError::TransportClosed(format!("flush failed: {e}")))
    }

    /// Wait for the next non-empty line on stdout.
    ///
    /// Returns `Ok(None)` on EOF, which is distinct from "not yet available":
    /// this future simply stays pending until a line or EOF arrives.
    ///
    /// # Errors
    ///
    /// - `AppError::MalformedFrame`: the line exceeds the framing limit.
    /// - `AppError::ConnectionLost`: stdout failed with an I/O error.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            match self.stdout.next().await {
                None => return Ok(None),
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => return Ok(Some(line)),
                Some(Err(err)) => return Err(err),
            }
        }
    }

    /// Collect buffered stderr for a diagnostic message.
    ///
    /// Waits at most `budget` for the stderr pump to reach EOF (so output of
    /// a child that just exited is complete), then takes whatever lines are
    /// buffered. Never fails; returns an empty string when nothing arrived.
    pub async fn drain_stderr(&mut self, budget: Duration) -> String {
        let finished = match self.stderr_pump.as_mut() {
            Some(pump) => tokio::time::timeout(budget, pump).await.is_ok(),
            None => false,
        };
        if finished {
            self.stderr_pump = None;
        }

        let mut tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tail.drain(..).collect::<Vec<_>>().join("\n")
    }

    /// Shut the child down: close stdin, wait up to `grace`, then kill.
    ///
    /// Idempotent: a second call returns the first call's report without
    /// touching the process again.
    pub async fn terminate(&mut self, grace: Duration) -> ExitReport {
        if let Some(report) = self.exit {
            return report;
        }

        // EOF on stdin is the server's cue to exit cleanly.
        drop(self.stdin.take());

        let report = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = self.pid, %status, "mcp server process exited");
                ExitReport {
                    status: Some(status),
                    forced: false,
                }
            }
            Ok(Err(err)) => {
                warn!(pid = self.pid, %err, "error waiting for mcp server process");
                ExitReport {
                    status: None,
                    forced: false,
                }
            }
            Err(_elapsed) => {
                warn!(
                    pid = self.pid,
                    ?grace,
                    "mcp server did not exit within grace period, killing it"
                );
                if let Err(err) = self.child.start_kill() {
                    warn!(pid = self.pid, %err, "failed to send kill signal");
                }
                let status = match tokio::time::timeout(KILL_REAP_TIMEOUT, self.child.wait()).await
                {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(err)) => {
                        warn!(pid = self.pid, %err, "error reaping killed server process");
                        None
                    }
                    Err(_) => {
                        warn!(pid = self.pid, "killed server process was not reaped in time");
                        None
                    }
                };
                ExitReport {
                    status,
                    forced: true,
                }
            }
        };

        if let Some(pump) = self.stderr_pump.take() {
            pump.abort();
        }
        self.exit = Some(report);
        report
    }
}

/// Continuously read the child's stderr into the bounded tail buffer.
///
/// Lines longer than [`MAX_LINE_BYTES`] are skipped up to the next newline.
fn spawn_stderr_pump(
    pid: u32,
    mut stderr: ChildStderr,
    tail: Arc<Mutex<VecDeque<String>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut codec = LinesCodec::new_with_max_length(MAX_LINE_BYTES);
        let mut buf = BytesMut::with_capacity(8 * 1024);
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(line)) => {
                    push_stderr_line(pid, &tail, &line);
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(pid, %err, "skipping unreadable stderr line");
                    continue;
                }
            }
            match stderr.read_buf(&mut buf).await {
                Ok(0) => {
                    while let Ok(Some(line)) = codec.decode_eof(&mut buf) {
                        push_stderr_line(pid, &tail, &line);
                    }
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(pid, %err, "stderr pump stopped");
                    break;
                }
            }
        }
    })
}

fn push_stderr_line(pid: u32, tail: &Mutex<VecDeque<String>>, line: &str) {
    let line = line.trim_end().to_owned();
    debug!(target: "child_stderr", pid, "{line}");
    let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

//! One-shot code execution.
//!
//! Submitted code is written to a uniquely named file inside a fresh
//! temporary directory and run with the configured interpreter. The
//! directory and its file are removed when the call returns, on success,
//! failure, and timeout alike.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{AppError, Result};

/// Captured result of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    /// Everything the program wrote to stdout.
    pub stdout: String,
    /// Everything the program wrote to stderr.
    pub stderr: String,
    /// Exit code; `None` if the program was killed by a signal.
    pub exit_code: Option<i32>,
}

/// Run `code` with `interpreter`, killing it after `limit`.
///
/// # Errors
///
/// - `AppError::Io` if the temporary file cannot be written.
/// - `AppError::Exec` if the interpreter cannot be started.
/// - `AppError::ExecTimeout` if the program runs longer than `limit`.
pub async fn run_code(code: &str, interpreter: &str, limit: Duration) -> Result<ExecOutput> {
    let workdir = tempfile::tempdir()?;
    let script = workdir
        .path()
        .join(format!("script_{}.py", Uuid::new_v4().simple()));
    tokio::fs::write(&script, code).await?;
    debug!(path = %script.display(), interpreter, "running submitted code");

    let child = Command::new(interpreter)
        .arg(&script)
        .current_dir(workdir.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Exec(format!("failed to start '{interpreter}': {err}")))?;

    // Dropping the `wait_with_output` future on timeout drops the child,
    // which kills it.
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(?limit, "submitted code exceeded its time limit");
            return Err(AppError::ExecTimeout(limit));
        }
    };

    let result = ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    };
    info!(exit_code = ?result.exit_code, "submitted code finished");
    Ok(result)
}

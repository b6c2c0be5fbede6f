//! MCP server script lookup.
//!
//! Only the file name of the configured script is used; any directory part
//! is ignored so the same configuration works from a container image and a
//! local checkout. Candidates are checked in this order:
//!
//! 1. The directory of the running executable.
//! 2. The current working directory.
//! 3. Each configured `script_dirs` entry.

use std::env;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{AppError, Result};

/// Resolve `script` to an existing file.
///
/// # Errors
///
/// Returns `AppError::ScriptNotFound` listing every path that was tried.
pub fn locate_script(script: &str, extra_dirs: &[PathBuf]) -> Result<PathBuf> {
    let Some(file_name) = Path::new(script).file_name() else {
        return Err(AppError::ScriptNotFound {
            script: script.to_owned(),
            tried: Vec::new(),
        });
    };

    let mut candidates = Vec::with_capacity(extra_dirs.len() + 2);
    if let Some(exe_dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(file_name));
    }
    if let Ok(cwd) = env::current_dir() {
        candidates.push(cwd.join(file_name));
    }
    candidates.extend(extra_dirs.iter().map(|dir| dir.join(file_name)));

    for candidate in &candidates {
        debug!(path = %candidate.display(), "checking for mcp server script");
        if candidate.is_file() {
            info!(path = %candidate.display(), "found mcp server script");
            return Ok(candidate.clone());
        }
    }

    Err(AppError::ScriptNotFound {
        script: script.to_owned(),
        tried: candidates,
    })
}

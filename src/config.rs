//! Global configuration parsing, validation, and environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::stdio::ConnectionOptions;
use crate::{AppError, Result};

/// Environment variable overriding [`ServerConfig::command`].
pub const ENV_SERVER_COMMAND: &str = "MCP_SERVER_COMMAND";
/// Environment variable overriding [`ServerConfig::script`].
pub const ENV_SERVER_SCRIPT: &str = "MCP_SERVER_SCRIPT";
/// Environment variable overriding [`ServerConfig::resource_script`].
pub const ENV_SERVER_RESOURCE_SCRIPT: &str = "MCP_SERVER_RESOURCE_SCRIPT";

/// How the MCP server child process is launched.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interpreter or executable.
    #[serde(default = "default_command")]
    pub command: String,
    /// Script passed to the command; empty means the command is the server.
    #[serde(default = "default_script")]
    pub script: String,
    /// Script looked up instead of `script` when set.
    #[serde(default)]
    pub resource_script: Option<String>,
    /// Extra arguments appended after the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Additional directories searched for the script.
    #[serde(default)]
    pub script_dirs: Vec<PathBuf>,
}

fn default_command() -> String {
    "python3".into()
}

fn default_script() -> String {
    "mcp_server_impl.py".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            script: default_script(),
            resource_script: None,
            args: Vec::new(),
            script_dirs: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Script identifier to resolve, or `None` when no script is used.
    #[must_use]
    pub fn script_name(&self) -> Option<&str> {
        self.resource_script
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| Some(self.script.as_str()).filter(|s| !s.trim().is_empty()))
    }
}

/// Timeouts for the stdio peer (seconds unless noted).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Per-call timeout, applied to the handshake as well.
    #[serde(default = "default_call_seconds")]
    pub call_seconds: u64,
    /// Wait after closing stdin before the child is killed.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Budget for collecting stderr diagnostics, in milliseconds.
    #[serde(default = "default_stderr_drain_millis")]
    pub stderr_drain_millis: u64,
}

fn default_call_seconds() -> u64 {
    30
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

fn default_stderr_drain_millis() -> u64 {
    100
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_seconds: default_call_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            stderr_drain_millis: default_stderr_drain_millis(),
        }
    }
}

/// HTTP shell settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HttpConfig {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8000".into()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// One-shot code execution settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecConfig {
    /// Interpreter used to run submitted code.
    #[serde(default = "default_command")]
    pub interpreter: String,
    /// Execution time limit.
    #[serde(default = "default_exec_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_exec_timeout_seconds() -> u64 {
    30
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            interpreter: default_command(),
            timeout_seconds: default_exec_timeout_seconds(),
        }
    }
}

impl ExecConfig {
    /// Execution time limit as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Global configuration parsed from an optional TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// MCP server launch settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Stdio peer timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// HTTP shell settings.
    #[serde(default)]
    pub http: HttpConfig,
    /// One-shot execution settings.
    #[serde(default)]
    pub exec: ExecConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MCP_SERVER_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the overridden configuration is invalid.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply `MCP_SERVER_*` overrides from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the overridden configuration is invalid.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(command) = lookup(ENV_SERVER_COMMAND) {
            self.server.command = command;
        }
        if let Some(script) = lookup(ENV_SERVER_SCRIPT) {
            self.server.script = script;
        }
        if let Some(script) = lookup(ENV_SERVER_RESOURCE_SCRIPT) {
            self.server.resource_script = Some(script);
        }
        self.validate()
    }

    /// Per-call timeout for the stdio peer.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.call_seconds)
    }

    /// Grace period between closing stdin and killing the child.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.timeouts.shutdown_grace_seconds)
    }

    /// Budget for stderr diagnostics.
    #[must_use]
    pub fn stderr_budget(&self) -> Duration {
        Duration::from_millis(self.timeouts.stderr_drain_millis)
    }

    /// Timing knobs for each stdio connection.
    #[must_use]
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            call_timeout: self.call_timeout(),
            shutdown_grace: self.shutdown_grace(),
            stderr_budget: self.stderr_budget(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.server.command.trim().is_empty() {
            return Err(AppError::Config("server.command must not be empty".into()));
        }
        if self.timeouts.call_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.call_seconds must be greater than zero".into(),
            ));
        }
        if self.timeouts.shutdown_grace_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.shutdown_grace_seconds must be greater than zero".into(),
            ));
        }
        if self.exec.timeout_seconds == 0 {
            return Err(AppError::Config(
                "exec.timeout_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

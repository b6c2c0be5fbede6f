//! MCP service facade.
//!
//! [`McpService`] owns the one shared [`Connection`] to the MCP server and
//! exposes the domain operations as typed results. The connection is built
//! lazily on first use:
//!
//! - Exactly one caller (the *builder*) performs `connect` + `handshake`.
//!   Callers arriving meanwhile wait on a `watch` channel and receive the
//!   builder's outcome, success or failure alike.
//! - A failed build leaves the slot empty, so the next call retries from
//!   scratch. Failures are never cached.
//! - A connection torn down by a fatal call error (timeout, EOF, id
//!   mismatch) is no longer `Ready`; the next caller replaces it.
//! - If a builder is cancelled mid-build, a drop guard clears the slot and
//!   the waiters retry.
//!
//! Domain operations never return `Err`: list operations degrade to an empty
//! list and single-item operations to a `{success: false, error}` envelope,
//! with the cause logged.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::GlobalConfig;
use crate::models::{PromptInfo, ResourceContent, ResourceInfo, ToolInfo, ToolResult};
use crate::script::locate_script;
use crate::stdio::{methods, Connection, ConnectionOptions, LaunchSpec};
use crate::{AppError, Result};

/// Everything needed to build a fresh connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Interpreter or executable.
    pub program: String,
    /// Script identifier, resolved with [`locate_script`] on every build.
    pub script: Option<String>,
    /// Extra directories searched for the script.
    pub script_dirs: Vec<PathBuf>,
    /// Arguments appended after the script.
    pub args: Vec<String>,
    /// Per-connection timing.
    pub options: ConnectionOptions,
}

impl ServiceSettings {
    /// Derive settings from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            program: config.server.command.clone(),
            script: config.server.script_name().map(str::to_owned),
            script_dirs: config.server.script_dirs.clone(),
            args: config.server.args.clone(),
            options: config.connection_options(),
        }
    }

    fn launch_spec(&self) -> Result<LaunchSpec> {
        let script = self
            .script
            .as_deref()
            .map(|name| locate_script(name, &self.script_dirs))
            .transpose()?;
        Ok(LaunchSpec {
            program: self.program.clone(),
            script,
            args: self.args.clone(),
        })
    }
}

/// Snapshot returned by [`McpService::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    /// Whether the shared connection is `Ready`.
    pub connected: bool,
    /// Unix time of the snapshot, in milliseconds.
    pub timestamp: i64,
}

type BuildOutcome = std::result::Result<Arc<Connection>, AppError>;

enum Slot {
    Empty,
    Building {
        generation: u64,
        outcome: watch::Receiver<Option<BuildOutcome>>,
    },
    Ready(Arc<Connection>),
}

enum Role {
    Build {
        generation: u64,
        publish: watch::Sender<Option<BuildOutcome>>,
        stale: Option<Arc<Connection>>,
    },
    Wait(watch::Receiver<Option<BuildOutcome>>),
}

/// Shared facade over the lazily built MCP server connection.
pub struct McpService {
    settings: ServiceSettings,
    slot: Mutex<Slot>,
    generation: AtomicU64,
    attempts: AtomicU64,
}

impl std::fmt::Debug for McpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpService")
            .field("settings", &self.settings)
            .field("connected", &self.is_connected())
            .field("build_attempts", &self.build_attempts())
            .finish_non_exhaustive()
    }
}

impl McpService {
    /// Create a service; nothing is spawned until the first call.
    #[must_use]
    pub fn new(settings: ServiceSettings) -> Self {
        Self {
            settings,
            slot: Mutex::new(Slot::Empty),
            generation: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
        }
    }

    /// Create a service from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(ServiceSettings::from_config(config))
    }

    /// Settings used for every build.
    #[must_use]
    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Number of `connect` + `handshake` sequences started so far.
    #[must_use]
    pub fn build_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Return the shared `Ready` connection, building it if necessary.
    ///
    /// # Errors
    ///
    /// Returns the build failure (`ScriptNotFound`, `Connect`, or
    /// `Initialization`) to the builder and to every caller that waited on
    /// the same attempt.
    pub async fn ensure_ready(&self) -> Result<Arc<Connection>> {
        loop {
            let role = {
                let mut slot = self.lock_slot();
                match &*slot {
                    Slot::Ready(conn) if conn.is_ready() => return Ok(Arc::clone(conn)),
                    Slot::Building { outcome, .. } => Role::Wait(outcome.clone()),
                    Slot::Ready(_) | Slot::Empty => {
                        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                        let (publish, outcome) = watch::channel(None);
                        let previous =
                            std::mem::replace(&mut *slot, Slot::Building { generation, outcome });
                        let stale = match previous {
                            Slot::Ready(conn) => Some(conn),
                            _ => None,
                        };
                        Role::Build {
                            generation,
                            publish,
                            stale,
                        }
                    }
                }
            };

            match role {
                Role::Build {
                    generation,
                    publish,
                    stale,
                } => return self.run_build(generation, publish, stale).await,
                Role::Wait(mut outcome) => {
                    debug!("mcp service initialization in progress, waiting");
                    if let Ok(published) = outcome.wait_for(Option::is_some).await {
                        if let Some(result) = published.as_ref() {
                            return result.clone();
                        }
                    }
                    debug!("mcp service initializer abandoned its attempt, retrying");
                }
            }
        }
    }

    /// Eagerly build the connection at startup.
    ///
    /// # Errors
    ///
    /// Same as [`McpService::ensure_ready`].
    pub async fn start(&self) -> Result<()> {
        info!("initializing mcp service");
        let conn = self.ensure_ready().await?;
        info!(pid = conn.pid().unwrap_or(0), "mcp service initialization complete");
        Ok(())
    }

    /// Disconnect the shared connection and clear the slot.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lock_slot(), Slot::Empty);
        if let Slot::Ready(conn) = previous {
            info!("cleaning up mcp service");
            if let Some(report) = conn.disconnect().await {
                info!(forced = report.forced, "mcp service cleaned up");
            }
        }
    }

    /// `true` iff a shared connection exists and is `Ready`. Never blocks.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        match &*self.lock_slot() {
            Slot::Ready(conn) => conn.is_ready(),
            _ => false,
        }
    }

    /// Process id of the current shared connection's child.
    #[must_use]
    pub fn current_pid(&self) -> Option<u32> {
        match &*self.lock_slot() {
            Slot::Ready(conn) => conn.pid(),
            _ => None,
        }
    }

    /// Connection status with a millisecond timestamp.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            connected: self.is_connected(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    // ── Domain operations ─────────────────────────────────────────────────────

    /// Tools offered by the server; empty on any failure.
    pub async fn list_tools(&self) -> Vec<ToolInfo> {
        match self.request(methods::LIST_TOOLS, None).await {
            Ok(result) => ToolInfo::list_from_result(&result),
            Err(err) => {
                error!(%err, "failed to get tool list");
                Vec::new()
            }
        }
    }

    /// Invoke a tool.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        let params = json!({ "tool_name": name, "arguments": arguments });
        match self.request(methods::CALL_TOOL, Some(params)).await {
            Ok(result) => ToolResult::from_result(result),
            Err(err) => {
                error!(tool = name, %err, "failed to execute tool");
                ToolResult::failure(err.to_string())
            }
        }
    }

    /// Resources offered by the server; empty on any failure.
    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        match self.request(methods::LIST_RESOURCES, None).await {
            Ok(result) => ResourceInfo::list_from_result(&result),
            Err(err) => {
                error!(%err, "failed to get resource list");
                Vec::new()
            }
        }
    }

    /// Read one resource.
    pub async fn read_resource(&self, uri: &str) -> ResourceContent {
        match self
            .request(methods::READ_RESOURCE, Some(json!({ "uri": uri })))
            .await
        {
            Ok(result) => ResourceContent::from_result(result),
            Err(err) => {
                error!(uri, %err, "failed to read resource");
                ResourceContent::failure(err.to_string())
            }
        }
    }

    /// Prompts offered by the server; empty on any failure.
    pub async fn list_prompts(&self) -> Vec<PromptInfo> {
        match self.request(methods::LIST_PROMPTS, None).await {
            Ok(result) => PromptInfo::list_from_result(&result),
            Err(err) => {
                error!(%err, "failed to get prompt list");
                Vec::new()
            }
        }
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let conn = self.ensure_ready().await?;
        conn.call(method, params).await
    }

    async fn run_build(
        &self,
        generation: u64,
        publish: watch::Sender<Option<BuildOutcome>>,
        stale: Option<Arc<Connection>>,
    ) -> Result<Arc<Connection>> {
        let mut guard = BuildGuard {
            service: self,
            generation,
            armed: true,
        };

        if let Some(stale) = stale {
            debug!("discarding mcp connection that is no longer ready");
            stale.disconnect().await;
        }

        let outcome = self.build().await;

        let published = {
            let mut slot = self.lock_slot();
            let current =
                matches!(&*slot, Slot::Building { generation: g, .. } if *g == generation);
            if current {
                *slot = match &outcome {
                    Ok(conn) => Slot::Ready(Arc::clone(conn)),
                    Err(_) => Slot::Empty,
                };
            }
            current
        };
        guard.armed = false;

        let outcome = match outcome {
            Ok(conn) if !published => {
                warn!("mcp service was shut down during initialization, discarding connection");
                conn.disconnect().await;
                Err(AppError::NotReady(
                    "service was shut down during initialization".into(),
                ))
            }
            other => other,
        };

        publish.send_replace(Some(outcome.clone()));
        outcome
    }

    async fn build(&self) -> Result<Arc<Connection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let result = async {
            let spec = self.settings.launch_spec()?;
            info!(command = %spec.display(), "connecting to mcp server");
            let conn = Connection::new(self.settings.options);
            conn.connect(&spec).await?;
            conn.handshake().await?;
            Ok(Arc::new(conn))
        }
        .await;

        if let Err(err) = &result {
            error!(%err, "mcp service initialization failed");
        }
        result
    }
}

/// Clears a `Building` slot left behind by a cancelled builder.
struct BuildGuard<'a> {
    service: &'a McpService,
    generation: u64,
    armed: bool,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.service.lock_slot();
        if matches!(&*slot, Slot::Building { generation, .. } if *generation == self.generation) {
            *slot = Slot::Empty;
        }
    }
}

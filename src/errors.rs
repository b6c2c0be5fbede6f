//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all bridge failure modes.
///
/// `Clone` is required so that one failed initialization attempt can be
/// handed to every caller that was waiting on it.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure outside the stdio peer.
    Io(String),
    /// The child process could not be launched.
    Spawn(String),
    /// Write attempted after stdin was closed or the child exited.
    TransportClosed(String),
    /// `connect` failed; the connection stays disconnected.
    Connect(String),
    /// The `initialize` handshake failed or was rejected.
    Initialization(String),
    /// An inbound line was not a valid JSON-RPC 2.0 response.
    MalformedFrame(String),
    /// Request/response correlation was lost.
    Protocol(String),
    /// The peer answered with a JSON-RPC `error` member.
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable error message.
        message: String,
        /// Optional structured error payload.
        data: Option<Value>,
    },
    /// The child closed stdout and its exit code was observed.
    PeerClosed {
        /// Exit code reported by the OS.
        code: i32,
        /// Tail of the child's stderr at the time of failure.
        stderr: String,
    },
    /// stdout reached EOF (or failed) without an observable exit code.
    ConnectionLost(String),
    /// No response arrived within the per-call timeout.
    CallTimeout {
        /// Method whose response never arrived.
        method: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// A call was issued while the connection was not `Ready`.
    NotReady(String),
    /// The server script could not be found in any candidate location.
    ScriptNotFound {
        /// Script identifier that was looked up.
        script: String,
        /// Every path that was checked.
        tried: Vec<PathBuf>,
    },
    /// One-shot code execution failed.
    Exec(String),
    /// One-shot code execution exceeded its time limit.
    ExecTimeout(Duration),
}

impl AppError {
    /// Whether this failure leaves the stdio peer in an untrustworthy state.
    ///
    /// Only peer-reported application errors keep the connection usable;
    /// every transport, codec, or timeout failure forces teardown.
    #[must_use]
    pub fn invalidates_connection(&self) -> bool {
        !matches!(self, Self::Rpc { .. })
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::TransportClosed(msg) => write!(f, "transport closed: {msg}"),
            Self::Connect(msg) => write!(f, "connect: {msg}"),
            Self::Initialization(msg) => write!(f, "initialization: {msg}"),
            Self::MalformedFrame(msg) => write!(f, "malformed frame: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Rpc { code, message, .. } => write!(f, "rpc error {code}: {message}"),
            Self::PeerClosed { code, stderr } => {
                write!(f, "peer closed: server exited with code {code}")?;
                if !stderr.is_empty() {
                    write!(f, "; stderr: {}", stderr.trim())?;
                }
                Ok(())
            }
            Self::ConnectionLost(msg) => write!(f, "connection lost: {msg}"),
            Self::CallTimeout { method, timeout } => {
                write!(f, "call timeout: '{method}' got no response within {timeout:?}")
            }
            Self::NotReady(msg) => write!(f, "not ready: {msg}"),
            Self::ScriptNotFound { script, tried } => {
                let tried = tried
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "script not found: '{script}'; tried locations: {tried}")
            }
            Self::Exec(msg) => write!(f, "exec: {msg}"),
            Self::ExecTimeout(limit) => write!(f, "exec timeout: execution exceeded {limit:?}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

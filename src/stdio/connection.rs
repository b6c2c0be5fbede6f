//! One logical JSON-RPC peer over a child process.
//!
//! A [`Connection`] composes a [`StdioTransport`] with the codec and walks
//! this state machine:
//!
//! ```text
//! Disconnected ─connect─▶ Connecting ─handshake─▶ Handshaking ─ok─▶ Ready
//!      ▲                      │                        │              │
//!      └──────── spawn error ─┘      init failure ─────┘   disconnect / fatal error
//!      └──────────────────────────── Disconnecting ◀──────────────────┘
//! ```
//!
//! # Call gate
//!
//! The transport sits behind a `tokio::sync::Mutex`. Every exchange holds
//! the lock from the moment the request is written until its response (or
//! failure) is read, so at most one request is ever in flight on the pipe.
//! Waiters queue in FIFO order. Request ids are assigned after the gate is
//! acquired, which makes wire order and id order identical.
//!
//! # Failure policy
//!
//! A peer-reported `error` member is returned as [`AppError::Rpc`] and the
//! connection stays `Ready`. Any other failure (transport, framing, id
//! mismatch, EOF, timeout) tears the child down and leaves the connection
//! `Disconnected`.
//!
//! A caller dropped mid-exchange leaves an unread response on the pipe. The
//! connection leaves `Ready` at that moment and refuses further calls until
//! it is disconnected.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::stdio::codec::{self, RpcResponse};
use crate::stdio::methods;
use crate::stdio::transport::{ExitReport, LaunchSpec, StdioTransport};
use crate::{AppError, Result};

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No child process.
    Disconnected,
    /// Child spawned, handshake not yet attempted.
    Connecting,
    /// `initialize` in flight.
    Handshaking,
    /// Handshake succeeded; domain calls are accepted.
    Ready,
    /// Teardown in progress.
    Disconnecting,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Timing knobs for a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Upper bound on one request/response exchange, handshake included.
    pub call_timeout: Duration,
    /// How long `disconnect` waits after closing stdin before killing.
    pub shutdown_grace: Duration,
    /// How long failure diagnostics wait for stderr output.
    pub stderr_budget: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            stderr_budget: Duration::from_millis(100),
        }
    }
}

/// Transport plus the id of the request currently occupying it.
#[derive(Debug)]
struct Wire {
    transport: StdioTransport,
    in_flight: Option<u64>,
}

/// A JSON-RPC peer backed by one child process.
#[derive(Debug)]
pub struct Connection {
    options: ConnectionOptions,
    state: Mutex<ConnectionState>,
    gate: tokio::sync::Mutex<Option<Wire>>,
    next_id: AtomicU64,
    pid: AtomicU32,
    shutdown: Mutex<CancellationToken>,
}

impl Connection {
    /// Create a disconnected peer. Request ids start at 1.
    #[must_use]
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            state: Mutex::new(ConnectionState::Disconnected),
            gate: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
            pid: AtomicU32::new(0),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process id of the attached child, if any.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// The id the next request will carry.
    #[must_use]
    pub fn next_request_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Non-blocking readiness probe: `Ready` and the child is still alive.
    ///
    /// When a call currently holds the gate the child is assumed alive; a
    /// dead child is detected by that call and tears the peer down.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        if self.state() != ConnectionState::Ready {
            return false;
        }
        match self.gate.try_lock() {
            Ok(mut wire) => wire
                .as_mut()
                .is_some_and(|wire| wire.in_flight.is_none() && wire.transport.is_alive()),
            Err(_) => true,
        }
    }

    /// Spawn the server process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Connect` if the connection is not `Disconnected`
    /// or the process cannot be launched. The state is left `Disconnected`
    /// on failure.
    pub async fn connect(&self, spec: &LaunchSpec) -> Result<()> {
        self.advance(&[ConnectionState::Disconnected], ConnectionState::Connecting)
            .map_err(|state| AppError::Connect(format!("cannot connect while {state}")))?;

        let mut wire = self.gate.lock().await;
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        match StdioTransport::spawn(spec) {
            Ok(transport) => {
                self.pid.store(transport.pid(), Ordering::SeqCst);
                *wire = Some(Wire {
                    transport,
                    in_flight: None,
                });
                Ok(())
            }
            Err(err) => {
                error!(command = %spec.display(), %err, "failed to start mcp server");
                self.set_state(ConnectionState::Disconnected);
                Err(AppError::Connect(err.to_string()))
            }
        }
    }

    /// Perform the `initialize` handshake.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Initialization` if the connection is not freshly
    /// connected, the server reports anything but `status: "success"`, or
    /// the exchange fails. The child is torn down before returning so a
    /// failed handshake never leaks a process.
    pub async fn handshake(&self) -> Result<()> {
        self.advance(&[ConnectionState::Connecting], ConnectionState::Handshaking)
            .map_err(|state| {
                AppError::Initialization(format!("handshake requires a connected peer, state is {state}"))
            })?;

        let mut wire = self.gate.lock().await;
        let reason = match self.exchange_bounded(&mut wire, methods::INITIALIZE, None).await {
            Ok(result) if result.get("status").and_then(Value::as_str) == Some("success") => {
                if self
                    .advance(&[ConnectionState::Handshaking], ConnectionState::Ready)
                    .is_ok()
                {
                    info!(pid = self.pid().unwrap_or(0), "mcp server reported successful initialization");
                    return Ok(());
                }
                "connection was closed during the handshake".to_owned()
            }
            Ok(result) => {
                let message = result
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("server did not report status 'success'");
                format!("server rejected initialize: {message}")
            }
            Err(AppError::Rpc { code, message, .. }) => format!("code {code}, message: {message}"),
            Err(other) => other.to_string(),
        };

        error!(%reason, "mcp server initialization failed");
        self.teardown(&mut wire).await;
        Err(AppError::Initialization(reason))
    }

    /// Issue one request and wait for its response.
    ///
    /// Concurrent callers queue on the call gate and are served one at a
    /// time in arrival order.
    ///
    /// # Errors
    ///
    /// - `AppError::NotReady`: the connection is not `Ready`.
    /// - `AppError::Rpc`: the server answered with an `error` member; the
    ///   connection stays `Ready`.
    /// - `AppError::CallTimeout`, `MalformedFrame`, `Protocol`, `PeerClosed`,
    ///   `ConnectionLost`, `TransportClosed`: the connection is torn down
    ///   and left `Disconnected`.
    /// - `AppError::TransportClosed`: [`Connection::disconnect`] interrupted
    ///   the call; the disconnect performs the teardown.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.ensure_ready_state()?;
        let mut wire = self.gate.lock().await;
        // A caller ahead in the queue may have torn the peer down.
        self.ensure_ready_state()?;

        let mut abandon = AbandonGuard {
            conn: self,
            method,
            armed: true,
        };
        let outcome = self.exchange_bounded(&mut wire, method, params.as_ref()).await;
        abandon.armed = false;

        match outcome {
            Ok(result) => Ok(result),
            Err(err) => {
                if self.shutdown_token().is_cancelled() {
                    debug!(method, %err, "call interrupted by disconnect");
                } else if err.invalidates_connection() {
                    warn!(method, %err, "call failed, tearing down mcp server connection");
                    self.teardown(&mut wire).await;
                } else {
                    debug!(method, %err, "server returned rpc error");
                }
                Err(err)
            }
        }
    }

    /// Tear the peer down. Safe from any state; a no-op when nothing is
    /// attached.
    ///
    /// An in-flight call is interrupted with `TransportClosed` instead of
    /// being waited for. stdin is then closed and the child is killed if it
    /// has not exited within the shutdown grace. Returns `None` when there
    /// was no child.
    pub async fn disconnect(&self) -> Option<ExitReport> {
        if self.state() != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnecting);
        }
        self.shutdown_token().cancel();
        let mut wire = self.gate.lock().await;
        if wire.is_none() {
            self.set_state(ConnectionState::Disconnected);
            return None;
        }
        info!(pid = self.pid().unwrap_or(0), "disconnecting from mcp server");
        self.teardown(&mut wire).await
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!(from = %*state, to = %next, "connection state change");
            *state = next;
        }
    }

    /// Move to `next` only from one of `from`; returns the current state
    /// otherwise.
    fn advance(
        &self,
        from: &[ConnectionState],
        next: ConnectionState,
    ) -> std::result::Result<(), ConnectionState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if from.contains(&state) {
            debug!(from = %*state, to = %next, "connection state change");
            *state = next;
            Ok(())
        } else {
            Err(*state)
        }
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_ready_state(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Ready => Ok(()),
            other => Err(AppError::NotReady(format!("connection is {other}"))),
        }
    }

    async fn teardown(&self, wire: &mut Option<Wire>) -> Option<ExitReport> {
        self.set_state(ConnectionState::Disconnecting);
        let report = match wire.take() {
            Some(mut wire) => Some(wire.transport.terminate(self.options.shutdown_grace).await),
            None => None,
        };
        self.pid.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        report
    }

    async fn exchange_bounded(
        &self,
        wire: &mut Option<Wire>,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value> {
        let wire = wire
            .as_mut()
            .ok_or_else(|| AppError::NotReady("no server process attached".into()))?;

        let shutdown = self.shutdown_token();
        let timeout = self.options.call_timeout;
        tokio::select! {
            biased;
            () = shutdown.cancelled() => Err(AppError::TransportClosed(
                "connection is shutting down".into(),
            )),
            bounded = tokio::time::timeout(timeout, self.exchange(wire, method, params)) => {
                match bounded {
                    Ok(outcome) => outcome,
                    Err(_elapsed) => Err(AppError::CallTimeout {
                        method: method.to_owned(),
                        timeout,
                    }),
                }
            }
        }
    }

    async fn exchange(&self, wire: &mut Wire, method: &str, params: Option<&Value>) -> Result<Value> {
        if let Some(stale) = wire.in_flight {
            return Err(AppError::Protocol(format!(
                "request {stale} was abandoned before its response was read"
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = codec::encode_request(method, params, id)?;
        let pid = wire.transport.pid();

        wire.in_flight = Some(id);
        debug!(pid, id, method, "sending request to mcp server");
        wire.transport.write_line(&frame).await?;

        let Some(line) = wire.transport.read_line().await? else {
            return Err(self.eof_error(&mut wire.transport).await);
        };

        let response: RpcResponse = match codec::decode_response(&line) {
            Ok(response) => response,
            Err(err) => {
                let stderr = wire.transport.drain_stderr(self.options.stderr_budget).await;
                warn!(pid, id, raw = line.trim(), %stderr, "undecodable response from mcp server");
                return Err(err);
            }
        };
        codec::ensure_correlated(id, &response)?;
        wire.in_flight = None;

        debug!(pid, id, method, "response received from mcp server");
        response.into_result()
    }

    async fn eof_error(&self, transport: &mut StdioTransport) -> AppError {
        let stderr = transport.drain_stderr(self.options.stderr_budget).await;
        match transport.wait_exit_code(self.options.stderr_budget).await {
            Some(code) => {
                error!(pid = transport.pid(), code, %stderr, "mcp server exited unexpectedly");
                AppError::PeerClosed { code, stderr }
            }
            None => {
                error!(pid = transport.pid(), %stderr, "mcp server closed stdout unexpectedly");
                let mut message = "server closed stdout unexpectedly".to_owned();
                if !stderr.is_empty() {
                    message.push_str("; stderr: ");
                    message.push_str(stderr.trim());
                }
                AppError::ConnectionLost(message)
            }
        }
    }
}

/// Takes a `Ready` connection out of service when a call is dropped before
/// its exchange completes.
struct AbandonGuard<'a> {
    conn: &'a Connection,
    method: &'a str,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            method = self.method,
            pid = self.conn.pid().unwrap_or(0),
            "call abandoned mid-exchange, connection is no longer usable"
        );
        // Only a `Ready` peer is demoted; `disconnect` may already own it.
        let _ = self
            .conn
            .advance(&[ConnectionState::Ready], ConnectionState::Disconnecting);
    }
}

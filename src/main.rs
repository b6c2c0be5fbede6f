#![forbid(unsafe_code)]

//! `mcp-stdio-bridge`: HTTP bridge to a stdio MCP server.
//!
//! Loads configuration, optionally warms up the MCP server connection, and
//! serves the HTTP shell until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_stdio_bridge::config::GlobalConfig;
use mcp_stdio_bridge::http::{self, AppState};
use mcp_stdio_bridge::service::McpService;
use mcp_stdio_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mcp-stdio-bridge", about = "HTTP bridge to a stdio MCP server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP listen address.
    #[arg(long)]
    bind: Option<String>,

    /// Defer connecting to the MCP server until the first request.
    #[arg(long)]
    lazy: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("mcp-stdio-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(bind) = args.bind {
        config.http.bind = bind;
    }
    info!(
        command = %config.server.command,
        script = config.server.script_name().unwrap_or(""),
        "configuration loaded"
    );

    // ── Build the MCP service ───────────────────────────
    let service = Arc::new(McpService::from_config(&config));
    if args.lazy {
        info!("lazy mode; mcp server will start on first request");
    } else if let Err(err) = service.start().await {
        warn!(%err, "mcp service startup failed; will retry on first request");
    }

    let state = Arc::new(AppState {
        service: Arc::clone(&service),
        exec: config.exec.clone(),
    });

    // ── Start HTTP shell ────────────────────────────────
    let ct = CancellationToken::new();
    let http_ct = ct.clone();
    let bind = config.http.bind.clone();
    let mut http_handle = tokio::spawn(async move { http::serve(state, &bind, http_ct).await });

    info!("mcp-stdio-bridge ready");

    // ── Wait for shutdown signal ────────────────────────
    let outcome = tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            join_http(http_handle).await
        }
        joined = &mut http_handle => flatten(joined),
    };

    service.shutdown().await;
    info!("mcp-stdio-bridge shut down");
    outcome
}

async fn join_http(handle: tokio::task::JoinHandle<Result<()>>) -> Result<()> {
    flatten(handle.await)
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            error!(%err, "http server failed");
            Err(err)
        }
        Err(err) => Err(AppError::Io(format!("http server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

#![forbid(unsafe_code)]

//! HTTP-facing bridge to an MCP server spoken to over a child process's
//! stdio with newline-delimited JSON-RPC 2.0.
//!
//! Layers, bottom-up:
//!
//! - [`stdio`]: child process transport, line codec, and the serialized
//!   request/response [`stdio::Connection`].
//! - [`service`]: the process-wide [`service::McpService`] facade with
//!   lazy single-flight initialization.
//! - [`http`]: the thin axum shell over the facade.

pub mod config;
pub mod errors;
pub mod exec;
pub mod http;
pub mod models;
pub mod script;
pub mod service;
pub mod stdio;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

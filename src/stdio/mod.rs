//! Stdio JSON-RPC peer.
//!
//! Drives one MCP server child process over its standard streams:
//!
//! - `codec`: newline framing plus JSON-RPC 2.0 request encoding, response
//!   decoding, and id correlation.
//! - `transport`: process spawn, stdin writes, stdout line reads, stderr
//!   diagnostics, and bounded graceful-then-forced termination.
//! - `connection`: the `Disconnected → Connecting → Handshaking → Ready`
//!   state machine and the call gate that keeps one request in flight.

pub mod codec;
pub mod connection;
pub mod transport;

pub use connection::{Connection, ConnectionOptions, ConnectionState};
pub use transport::{ExitReport, LaunchSpec, StdioTransport};

/// Method names understood by the MCP server.
pub mod methods {
    /// Mandatory handshake; success is `{"status":"success"}`.
    pub const INITIALIZE: &str = "initialize";
    /// List available tools.
    pub const LIST_TOOLS: &str = "list_tools";
    /// Invoke a tool with `{tool_name, arguments}`.
    pub const CALL_TOOL: &str = "call_tool";
    /// List available resources.
    pub const LIST_RESOURCES: &str = "list_resources";
    /// Read one resource by `{uri}`.
    pub const READ_RESOURCE: &str = "read_resource";
    /// List available prompts.
    pub const LIST_PROMPTS: &str = "list_prompts";
}

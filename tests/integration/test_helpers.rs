//! Shared helpers for integration tests that drive the `mcp-test-server`
//! binary over real pipes.

use std::path::Path;
use std::time::Duration;

use mcp_stdio_bridge::service::{McpService, ServiceSettings};
use mcp_stdio_bridge::stdio::{Connection, ConnectionOptions, LaunchSpec};

/// Path of the reference server built alongside the tests.
pub const TEST_SERVER: &str = env!("CARGO_BIN_EXE_mcp-test-server");

/// Short timeouts so failure paths finish quickly.
pub fn fast_options() -> ConnectionOptions {
    ConnectionOptions {
        call_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(1),
        stderr_budget: Duration::from_millis(200),
    }
}

/// Launch the reference server with extra switches.
pub fn server_spec(args: &[&str]) -> LaunchSpec {
    LaunchSpec {
        program: TEST_SERVER.to_owned(),
        script: None,
        args: args.iter().map(|a| (*a).to_owned()).collect(),
    }
}

/// Launch the reference server, recording every request line to `path`.
pub fn recording_spec(path: &Path) -> LaunchSpec {
    let path = path.to_str().expect("utf8 record path");
    server_spec(&["--record", path])
}

/// A connection that has completed its handshake.
pub async fn ready_connection(spec: &LaunchSpec, options: ConnectionOptions) -> Connection {
    let conn = Connection::new(options);
    conn.connect(spec).await.expect("connect");
    conn.handshake().await.expect("handshake");
    conn
}

/// Settings that launch the reference server directly, without a script.
pub fn service_settings(args: &[&str], options: ConnectionOptions) -> ServiceSettings {
    ServiceSettings {
        program: TEST_SERVER.to_owned(),
        script: None,
        script_dirs: Vec::new(),
        args: args.iter().map(|a| (*a).to_owned()).collect(),
        options,
    }
}

/// A lazily initialized service around the reference server.
pub fn test_service(args: &[&str]) -> McpService {
    McpService::new(service_settings(args, fast_options()))
}

/// Request lines the reference server received, parsed as JSON.
pub fn recorded_requests(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("recorded line is json"))
        .collect()
}

#![forbid(unsafe_code)]

//! `mcp-test-server`: reference stdio MCP server used by the integration
//! tests.
//!
//! Reads one JSON-RPC request per line from stdin and writes one response
//! per line to stdout. Diagnostics go to stderr. A handful of tools and
//! switches let tests provoke each failure mode of the client side.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "mcp-test-server",
    about = "Reference stdio MCP server for tests",
    version,
    long_about = None
)]
struct Cli {
    /// Answer `initialize` with `status: "error"`.
    #[arg(long)]
    fail_init: bool,

    /// Keep running after stdin is closed.
    #[arg(long)]
    ignore_stdin_close: bool,

    /// Append every received request line to this file.
    #[arg(long)]
    record: Option<PathBuf>,
}

/// What to do after handling one request.
enum Reply {
    Json(Value),
    Raw(String),
    Exit(i32),
}

fn main() {
    let args = Cli::parse();
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
    info!("test server started, ready to receive commands");

    let mut recorder = args.record.as_ref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| error!(path = %path.display(), %err, "cannot open record file"))
            .ok()
    });

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        record(recorder.as_mut(), &line);

        let reply = match serde_json::from_str::<Value>(&line) {
            Ok(request) => handle(&request, &args),
            Err(err) => {
                warn!(%err, "parse error");
                Reply::Json(error_response(
                    &Value::Null,
                    -32700,
                    &format!("Parse error: {err}"),
                    None,
                ))
            }
        };

        let out = match reply {
            Reply::Json(value) => value.to_string(),
            Reply::Raw(text) => text,
            Reply::Exit(code) => {
                eprintln!("fatal: test server exiting with code {code}");
                process::exit(code);
            }
        };
        if writeln!(stdout, "{out}").and_then(|()| stdout.flush()).is_err() {
            break;
        }
    }

    info!("stdin closed");
    if args.ignore_stdin_close {
        loop {
            thread::sleep(Duration::from_secs(3600));
        }
    }
}

fn record(file: Option<&mut File>, line: &str) {
    if let Some(file) = file {
        if let Err(err) = writeln!(file, "{line}").and_then(|()| file.flush()) {
            error!(%err, "failed to record request");
        }
    }
}

fn handle(request: &Value, args: &Cli) -> Reply {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Reply::Json(error_response(
            &id,
            -32600,
            "Invalid Request: missing 'jsonrpc: 2.0'",
            None,
        ));
    }

    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let params = request.get("params").cloned().unwrap_or(Value::Null);
    info!(method, %id, "request received");

    match method {
        "initialize" => Reply::Json(result_response(&id, initialize_result(args.fail_init))),
        "list_tools" => Reply::Json(result_response(&id, tool_list())),
        "call_tool" => call_tool(&id, &params),
        "list_resources" => Reply::Json(result_response(
            &id,
            json!({
                "resources": [{
                    "uri": "memo://readme",
                    "name": "README",
                    "description": "Project readme",
                    "mimeType": "text/plain",
                }]
            }),
        )),
        "read_resource" => Reply::Json(read_resource(&id, &params)),
        "list_prompts" => Reply::Json(result_response(
            &id,
            json!({
                "prompts": [{
                    "name": "summarize",
                    "description": "Summarize a text",
                    "arguments": [
                        { "name": "text", "required": true },
                        { "name": "style" },
                    ],
                }]
            }),
        )),
        other => Reply::Json(error_response(
            &id,
            -32601,
            &format!("Method not found: {other}"),
            None,
        )),
    }
}

fn initialize_result(fail: bool) -> Value {
    if fail {
        error!("initialization failed on request");
        json!({ "status": "error", "message": "initialization failed on request" })
    } else {
        json!({ "status": "success" })
    }
}

fn tool_list() -> Value {
    let object_schema = |props: Value| json!({ "type": "object", "properties": props });
    json!({
        "tools": [
            { "name": "echo", "description": "Echoes input" },
            {
                "name": "sleep",
                "description": "Sleeps before replying",
                "inputSchema": object_schema(json!({ "millis": { "type": "integer" } })),
            },
            {
                "name": "exit",
                "description": "Exits without replying",
                "inputSchema": object_schema(json!({ "code": { "type": "integer" } })),
            },
            { "name": "garbage", "inputSchema": object_schema(json!({})) },
            { "name": "mismatch", "inputSchema": object_schema(json!({})) },
            { "name": "fail", "inputSchema": object_schema(json!({})) },
            { "description": "entry without a name is ignored by clients" },
        ]
    })
}

fn call_tool(id: &Value, params: &Value) -> Reply {
    let name = params.get("tool_name").and_then(Value::as_str).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    match name {
        "echo" => {
            let text = arguments.get("text").and_then(Value::as_str).unwrap_or("");
            Reply::Json(result_response(id, text_content(text)))
        }
        "sleep" => {
            let millis = arguments.get("millis").and_then(Value::as_u64).unwrap_or(0);
            thread::sleep(Duration::from_millis(millis));
            Reply::Json(result_response(id, text_content(&format!("slept {millis}ms"))))
        }
        "exit" => {
            let code = arguments
                .get("code")
                .and_then(Value::as_i64)
                .and_then(|c| i32::try_from(c).ok())
                .unwrap_or(1);
            Reply::Exit(code)
        }
        "garbage" => Reply::Raw("not json".into()),
        "mismatch" => {
            let wrong = id.as_u64().map_or(Value::Null, |n| json!(n + 1000));
            Reply::Json(result_response(&wrong, text_content("wrong id")))
        }
        "fail" => Reply::Json(error_response(
            id,
            -32000,
            "tool failed on request",
            Some(json!({ "tool": "fail" })),
        )),
        other => Reply::Json(error_response(
            id,
            -32602,
            &format!("Unknown tool: {other}"),
            None,
        )),
    }
}

fn read_resource(id: &Value, params: &Value) -> Value {
    match params.get("uri").and_then(Value::as_str) {
        Some(uri @ "memo://readme") => result_response(
            id,
            json!({
                "contents": [{
                    "uri": uri,
                    "mimeType": "text/plain",
                    "text": "hello from the test server",
                }]
            }),
        ),
        other => error_response(
            id,
            -32002,
            &format!("Resource not found: {}", other.unwrap_or("")),
            None,
        ),
    }
}

fn text_content(text: &str) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

fn result_response(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "result": result, "id": id })
}

fn error_response(id: &Value, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({ "jsonrpc": "2.0", "error": error, "id": id })
}

//! Unit tests for `AppError` display format and teardown classification.

use std::path::PathBuf;
use std::time::Duration;

use mcp_stdio_bridge::AppError;

#[test]
fn rpc_error_keeps_connection() {
    let err = AppError::Rpc {
        code: -32000,
        message: "tool failed".into(),
        data: None,
    };
    assert!(!err.invalidates_connection());
    assert_eq!(err.to_string(), "rpc error -32000: tool failed");
}

#[test]
fn transport_failures_invalidate_connection() {
    let failures = [
        AppError::MalformedFrame("x".into()),
        AppError::Protocol("x".into()),
        AppError::ConnectionLost("x".into()),
        AppError::TransportClosed("x".into()),
        AppError::CallTimeout {
            method: "call_tool".into(),
            timeout: Duration::from_secs(1),
        },
        AppError::PeerClosed {
            code: 1,
            stderr: String::new(),
        },
    ];
    for err in failures {
        assert!(err.invalidates_connection(), "{err} must force teardown");
    }
}

#[test]
fn peer_closed_includes_code_and_stderr() {
    let err = AppError::PeerClosed {
        code: 3,
        stderr: "Traceback: boom\n".into(),
    };
    assert_eq!(
        err.to_string(),
        "peer closed: server exited with code 3; stderr: Traceback: boom"
    );
}

#[test]
fn peer_closed_without_stderr_omits_suffix() {
    let err = AppError::PeerClosed {
        code: 0,
        stderr: String::new(),
    };
    assert_eq!(err.to_string(), "peer closed: server exited with code 0");
}

#[test]
fn call_timeout_names_method() {
    let err = AppError::CallTimeout {
        method: "list_tools".into(),
        timeout: Duration::from_millis(250),
    };
    let s = err.to_string();
    assert!(s.starts_with("call timeout:"));
    assert!(s.contains("list_tools"));
    assert!(s.contains("250ms"));
}

#[test]
fn script_not_found_lists_tried_paths() {
    let err = AppError::ScriptNotFound {
        script: "server.py".into(),
        tried: vec![PathBuf::from("/a/server.py"), PathBuf::from("/b/server.py")],
    };
    assert_eq!(
        err.to_string(),
        "script not found: 'server.py'; tried locations: /a/server.py, /b/server.py"
    );
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err = AppError::from(io);
    assert!(matches!(err, AppError::Io(ref msg) if msg == "gone"));
}

#[test]
fn messages_have_no_trailing_period() {
    let errs = [
        AppError::Config("bad value".into()),
        AppError::NotReady("connection is disconnected".into()),
        AppError::ExecTimeout(Duration::from_secs(30)),
    ];
    for err in errs {
        let s = err.to_string();
        assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
    }
}

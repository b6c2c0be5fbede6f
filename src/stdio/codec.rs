//! JSON-RPC 2.0 codec for the stdio wire.
//!
//! Two layers live here:
//!
//! - [`FrameCodec`]: newline framing over the child's stdout, wrapping
//!   [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//!   misbehaving server cannot make the bridge allocate without bound.
//! - [`encode_request`] / [`decode_response`] / [`ensure_correlated`]:
//!   the JSON-RPC envelope rules. Request ids are always supplied by the
//!   caller; the codec never chooses one.
//!
//! # Wire format
//!
//! ```text
//! → {"jsonrpc":"2.0","method":"list_tools","id":2}
//! ← {"jsonrpc":"2.0","id":2,"result":{"tools":[…]}}
//! ← {"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"…"}}
//! ```

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Protocol version carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Maximum inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline framing for the child's stdout.
///
/// Lines longer than [`MAX_LINE_BYTES`] decode to
/// [`AppError::MalformedFrame`] rather than being buffered.
#[derive(Debug)]
pub struct FrameCodec(LinesCodec);

impl FrameCodec {
    /// Create a new `FrameCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::MalformedFrame(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::ConnectionLost(format!("stdout read failed: {io_err}")),
    }
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RequestEnvelope<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

/// Inbound envelope before validation. Every member is optional so that
/// missing fields surface as [`AppError::MalformedFrame`] with a precise
/// message rather than a generic serde error.
#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    jsonrpc: Option<String>,
    id: Option<Value>,
    result: Option<Value>,
    error: Option<Value>,
}

/// Peer-reported JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RpcErrorObject {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<RpcErrorObject> for AppError {
    fn from(err: RpcErrorObject) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    /// Id echoed by the peer.
    pub id: u64,
    /// Either the `result` member or the `error` member.
    pub outcome: std::result::Result<Value, RpcErrorObject>,
}

impl RpcResponse {
    /// Convert into the raw result, mapping a peer error to [`AppError::Rpc`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Rpc`] when the response carried an `error` member.
    pub fn into_result(self) -> Result<Value> {
        self.outcome.map_err(AppError::from)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Serialize one request frame, including the trailing `\n`.
///
/// `params` is omitted from the object entirely when `None`.
///
/// # Errors
///
/// Returns [`AppError::MalformedFrame`] if serialization fails, which only
/// happens for values `serde_json` cannot represent.
pub fn encode_request(method: &str, params: Option<&Value>, id: u64) -> Result<Vec<u8>> {
    let envelope = RequestEnvelope {
        jsonrpc: JSONRPC_VERSION,
        method,
        id,
        params,
    };
    let mut bytes = serde_json::to_vec(&envelope)
        .map_err(|e| AppError::MalformedFrame(format!("failed to serialise request: {e}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse one inbound line into an [`RpcResponse`].
///
/// # Errors
///
/// - [`AppError::MalformedFrame`]`("malformed json: …")`: not valid JSON.
/// - [`AppError::MalformedFrame`]`("missing jsonrpc …")`: version absent or not `"2.0"`.
/// - [`AppError::MalformedFrame`]`("missing id …")`: id absent, null, or not a
///   non-negative integer.
/// - [`AppError::MalformedFrame`]`("invalid error object …")`: `error` member
///   present but not shaped `{code, message, data?}`.
pub fn decode_response(line: &str) -> Result<RpcResponse> {
    let envelope: ResponseEnvelope = serde_json::from_str(line.trim())
        .map_err(|e| AppError::MalformedFrame(format!("malformed json: {e}")))?;

    match envelope.jsonrpc.as_deref() {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(AppError::MalformedFrame(format!(
                "unsupported jsonrpc version '{other}'"
            )))
        }
        None => {
            return Err(AppError::MalformedFrame(
                "missing jsonrpc version member".into(),
            ))
        }
    }

    let id = envelope
        .id
        .as_ref()
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            AppError::MalformedFrame(format!(
                "missing id: expected a non-negative integer, got {}",
                envelope.id.as_ref().map_or_else(|| "nothing".to_owned(), Value::to_string)
            ))
        })?;

    let outcome = match envelope.error {
        Some(raw) => Err(serde_json::from_value::<RpcErrorObject>(raw)
            .map_err(|e| AppError::MalformedFrame(format!("invalid error object: {e}")))?),
        None => Ok(envelope.result.unwrap_or(Value::Null)),
    };

    Ok(RpcResponse { id, outcome })
}

/// Verify that `response` answers the request currently occupying the wire.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] on an id mismatch.
pub fn ensure_correlated(expected: u64, response: &RpcResponse) -> Result<()> {
    if response.id == expected {
        Ok(())
    } else {
        Err(AppError::Protocol(format!(
            "response id {} does not match in-flight request id {expected}",
            response.id
        )))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

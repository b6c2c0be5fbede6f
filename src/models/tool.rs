//! Tool listing and invocation records.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{first_entry, non_empty_str, object_entries, str_or_empty};

/// One entry of a `list_tools` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    /// Tool name used with `call_tool`.
    pub name: String,
    /// Description; empty when the server gives none.
    pub description: String,
    /// JSON Schema of the arguments, serialized as `null` when absent.
    pub input_schema: Option<Value>,
    /// The tool node exactly as the server sent it.
    #[serde(skip)]
    pub raw: Value,
}

impl ToolInfo {
    /// Extract every well-formed tool from a `{"tools": [...]}` result.
    ///
    /// Entries without a string `name` are skipped.
    #[must_use]
    pub fn list_from_result(result: &Value) -> Vec<Self> {
        object_entries(result, "tools")
            .filter_map(|node| {
                let Some(name) = node.get("name").and_then(Value::as_str) else {
                    debug!(?node, "skipping tool entry without a name");
                    return None;
                };
                Some(Self {
                    name: name.to_owned(),
                    description: str_or_empty(node, "description"),
                    input_schema: node.get("inputSchema").filter(|s| !s.is_null()).cloned(),
                    raw: Value::Object(node.clone()),
                })
            })
            .collect()
    }
}

/// Outcome envelope of `call_tool`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// `false` when the call could not be completed.
    pub success: bool,
    /// Text of the first content item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    /// Type of the first content item (e.g. `text`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Full result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    /// Failure message when `success` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Shape a successful `call_tool` result.
    #[must_use]
    pub fn from_result(result: Value) -> Self {
        let first = first_entry(&result, "content");
        Self {
            success: true,
            text_content: first.and_then(|c| non_empty_str(c, "text")),
            content_type: first.and_then(|c| non_empty_str(c, "type")),
            raw_response: Some(result),
            error: None,
        }
    }

    /// A `{success: false, error}` envelope.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            text_content: None,
            content_type: None,
            raw_response: None,
            error: Some(message.into()),
        }
    }
}

//! Resource listing and content records.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{first_entry, non_empty_str, object_entries, str_or_empty};

/// One entry of a `list_resources` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// Resource URI used with `read_resource`.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// MIME type.
    pub mime_type: String,
    /// The resource node exactly as the server sent it.
    #[serde(skip)]
    pub raw: Value,
}

impl ResourceInfo {
    /// Extract every resource carrying a string `uri` from a
    /// `{"resources": [...]}` result.
    #[must_use]
    pub fn list_from_result(result: &Value) -> Vec<Self> {
        object_entries(result, "resources")
            .filter_map(|node| {
                let Some(uri) = node.get("uri").and_then(Value::as_str) else {
                    debug!(?node, "skipping resource entry without a uri");
                    return None;
                };
                Some(Self {
                    uri: uri.to_owned(),
                    name: str_or_empty(node, "name"),
                    description: str_or_empty(node, "description"),
                    mime_type: str_or_empty(node, "mimeType"),
                    raw: Value::Object(node.clone()),
                })
            })
            .collect()
    }
}

/// Outcome envelope of `read_resource`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    /// `false` when the read could not be completed.
    pub success: bool,
    /// Text of the first content item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    /// URI reported by the first content item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// MIME type reported by the first content item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Full result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    /// Failure message when `success` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceContent {
    /// Shape a successful `read_resource` result.
    #[must_use]
    pub fn from_result(result: Value) -> Self {
        let first = first_entry(&result, "contents");
        Self {
            success: true,
            text_content: first.and_then(|c| non_empty_str(c, "text")),
            uri: first.and_then(|c| non_empty_str(c, "uri")),
            mime_type: first.and_then(|c| non_empty_str(c, "mimeType")),
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
            uri: None,
            mime_type: None,
            raw_response: None,
            error: Some(message.into()),
        }
    }
}

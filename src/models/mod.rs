//! Typed records translated from raw MCP result payloads.
//!
//! Each record keeps the payload fragment it was built from so fields the
//! bridge does not model yet are not lost.

use serde_json::{Map, Value};

pub mod prompt;
pub mod resource;
pub mod tool;

pub use prompt::PromptInfo;
pub use resource::{ResourceContent, ResourceInfo};
pub use tool::{ToolInfo, ToolResult};

/// Object entries of the array stored under `key`, skipping non-objects.
pub(crate) fn object_entries<'a>(
    result: &'a Value,
    key: &'a str,
) -> impl Iterator<Item = &'a Map<String, Value>> + 'a {
    result
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

/// First object in the array stored under `key`.
pub(crate) fn first_entry<'a>(result: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    result
        .get(key)
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(Value::as_object)
}

/// A string member, treating an empty string as absent.
pub(crate) fn non_empty_str(entry: &Map<String, Value>, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// A string member, defaulting to `""`.
pub(crate) fn str_or_empty(entry: &Map<String, Value>, key: &str) -> String {
    entry
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

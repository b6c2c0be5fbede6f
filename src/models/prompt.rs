//! Prompt listing record.

use serde::Serialize;
use serde_json::Value;

use super::{object_entries, str_or_empty};

/// One entry of a `list_prompts` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptInfo {
    /// Prompt name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Names of the declared arguments, in declaration order.
    pub arguments: Vec<String>,
    /// The prompt node exactly as the server sent it.
    #[serde(skip)]
    pub raw: Value,
}

impl PromptInfo {
    /// Extract every named prompt from a `{"prompts": [...]}` result.
    #[must_use]
    pub fn list_from_result(result: &Value) -> Vec<Self> {
        object_entries(result, "prompts")
            .filter_map(|node| {
                let name = node.get("name").and_then(Value::as_str)?;
                let arguments = node
                    .get("arguments")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|arg| arg.get("name").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect();
                Some(Self {
                    name: name.to_owned(),
                    description: str_or_empty(node, "description"),
                    arguments,
                    raw: Value::Object(node.clone()),
                })
            })
            .collect()
    }
}

//! LLM tool definitions for function calling.
//!
//! Tools are discovered from the MCP server at request time; this module only
//! holds the definition type and the schema clean-up some providers need.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition for LLM function calling.
///
/// Deserializes directly from an MCP `tools/list` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments.
    #[serde(rename = "inputSchema", alias = "parameters", default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDefinition {
    /// Returns the parameter schema reduced to the OpenAPI subset Gemini accepts.
    pub fn gemini_parameters(&self) -> Value {
        sanitize_schema(&self.parameters)
    }
}

/// Strips JSON Schema keywords that Gemini's function declarations reject.
fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !matches!(key.as_str(), "$schema" | "additionalProperties"))
                .map(|(key, value)| (key.clone(), sanitize_schema(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

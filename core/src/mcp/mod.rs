//! Model Context Protocol client
//!
//! Talks newline-delimited JSON-RPC 2.0 to tool servers spawned as child
//! processes, and adapts their tools to the agent `Tool` trait.

pub mod client;

pub use client::McpClient;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Protocol revision sent in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// How to launch one stdio MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Label used in logs and errors
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the child, applied after the AWS variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Pass AWS credentials and region to the child
    #[serde(default = "default_true")]
    pub inherit_aws_env: bool,
}

fn default_true() -> bool {
    true
}

/// A tool advertised by `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Result of `tools/call`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpCallResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default, rename = "structuredContent")]
    pub structured: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl McpCallResult {
    /// Text content items joined by newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_config_defaults() {
        let config: McpServerConfig = toml::from_str(
            r#"
            name = "local"
            command = "python"
            "#,
        )
        .unwrap();
        assert!(config.args.is_empty());
        assert!(config.inherit_aws_env);
    }

    #[test]
    fn test_call_result_text() {
        let result: McpCallResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Woodland Park Zoo"},
                {"type": "image", "data": "..."},
                {"type": "text", "text": "5500 Phinney Ave N"}
            ],
            "isError": false
        }))
        .unwrap();
        assert_eq!(result.text(), "Woodland Park Zoo\n5500 Phinney Ave N");
        assert!(result.structured.is_none());
    }

    #[test]
    fn test_tool_definition_without_schema() {
        let tool: McpToolDefinition =
            serde_json::from_value(json!({"name": "search_places"})).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.description.is_none());
    }
}

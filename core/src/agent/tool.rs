use crate::error::Result;
use crate::llm::ToolSpec;
use async_trait::async_trait;
use serde_json::Value;

/// Categorizes tools by where their work happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Runs in-process. The default.
    Internal,
    /// Calls an HTTP API (e.g., weather).
    Web,
    /// Proxied to an MCP server over stdio.
    Mcp,
}

/// A trait for tools that can be executed by an agent.
///
/// Each tool must be `Send + Sync` so one registry can serve concurrent
/// queries.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The name of the tool as the model sees it (e.g., "weather")
    fn name(&self) -> &str;

    /// A brief description of what the tool does
    fn description(&self) -> &str;

    /// JSON schema for the tool input
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": self.description()
                }
            },
            "required": ["query"]
        })
    }

    /// Execute the tool with the provided JSON input
    async fn call(&self, input: Value) -> Result<Value>;

    fn kind(&self) -> ToolKind {
        ToolKind::Internal
    }

    /// Definition handed to the model
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

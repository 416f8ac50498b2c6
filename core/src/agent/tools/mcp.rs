use crate::agent::tool::{Tool, ToolKind};
use crate::error::{AgentError, Result};
use crate::mcp::{McpClient, McpToolDefinition};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// One tool served by an MCP server
pub struct McpTool {
    client: Arc<McpClient>,
    definition: McpToolDefinition,
    description: String,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, definition: McpToolDefinition) -> Self {
        let description = definition
            .description
            .clone()
            .unwrap_or_else(|| format!("{} (from {})", definition.name, client.name()));
        Self {
            client,
            definition,
            description,
        }
    }

    /// Wrap every tool the server lists
    pub async fn discover(client: Arc<McpClient>) -> Result<Vec<McpTool>> {
        let definitions = client.list_tools().await?;
        Ok(definitions
            .into_iter()
            .map(|definition| McpTool::new(client.clone(), definition))
            .collect())
    }

    pub fn server(&self) -> &str {
        self.client.name()
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.definition.input_schema.clone()
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let arguments = match input {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let result = self.client.call_tool(&self.definition.name, arguments).await?;

        if result.is_error {
            return Err(AgentError::ToolExecutionFailed {
                tool_name: self.definition.name.clone(),
                error: result.text(),
            });
        }

        if let Some(structured) = result.structured {
            return Ok(structured);
        }
        Ok(Value::String(result.text()))
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Mcp
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::AwsSettings;
    use crate::mcp::McpServerConfig;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const SCRIPT: &str = r#"
read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"places","version":"1"}}}'
read line
read line
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"search_places","description":"Search for places","inputSchema":{"type":"object","properties":{"query":{"type":"string"}}}},{"name":"geocode"}]}}'
read line
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"Woodland Park Zoo"}],"structuredContent":{"places":[{"name":"Woodland Park Zoo"}]}}}'
read line
echo '{"jsonrpc":"2.0","id":4,"result":{"content":[{"type":"text","text":"geocoding failed"}],"isError":true}}'
read line
"#;

    #[tokio::test]
    async fn test_discover_and_call() {
        let config = McpServerConfig {
            name: "places".to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), SCRIPT.to_string()],
            env: BTreeMap::new(),
            inherit_aws_env: false,
        };
        let client = Arc::new(
            McpClient::spawn(&config, &AwsSettings::default(), Duration::from_secs(5))
                .await
                .unwrap(),
        );

        let tools = McpTool::discover(client.clone()).await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].description(), "Search for places");
        assert_eq!(tools[1].description(), "geocode (from places)");
        assert_eq!(tools[0].spec().input_schema["properties"]["query"]["type"], "string");
        assert_eq!(tools[0].kind(), ToolKind::Mcp);

        let out = tools[0].call(json!({"query": "zoo"})).await.unwrap();
        assert_eq!(out["places"][0]["name"], "Woodland Park Zoo");

        let err = tools[1].call(json!({"query": "nowhere"})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed { error, .. } if error == "geocoding failed"));

        client.close().await.unwrap();
    }
}

//! Tool registry
//!
//! Keeps tools in registration order (the order the model sees them) and
//! isolates tool failures behind `AgentError`.

use crate::agent::tool::Tool;
use crate::error::{AgentError, Result};
use crate::llm::ToolSpec;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A shareable registry of tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<Vec<Arc<dyn Tool>>>>,
    disabled_tools: Arc<RwLock<HashMap<String, String>>>, // tool_name -> reason
}

impl ToolRegistry {
    /// Create a new, empty tool registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name in place
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        {
            let mut tools = self.tools.write().await;
            match tools.iter().position(|t| t.name() == name) {
                Some(index) => {
                    tracing::debug!(tool = %name, "replacing registered tool");
                    tools[index] = tool;
                }
                None => tools.push(tool),
            }
        }

        self.disabled_tools.write().await.remove(&name);
    }

    /// Disable a tool (hide it from the model and reject calls) with a reason
    pub async fn disable(&self, name: &str, reason: impl Into<String>) {
        self.disabled_tools
            .write()
            .await
            .insert(name.to_string(), reason.into());
    }

    /// Enable a previously disabled tool
    pub async fn enable(&self, name: &str) {
        self.disabled_tools.write().await.remove(name);
    }

    /// Get a tool by name if it exists and is not disabled
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if self.disabled_tools.read().await.contains_key(name) {
            return None;
        }

        self.tools
            .read()
            .await
            .iter()
            .find(|t| t.name() == name)
            .cloned()
    }

    /// Check if a tool exists and is available
    pub async fn has(&self, name: &str) -> bool {
        self.get(name).await.is_some()
    }

    /// Names of all available tools in registration order
    pub async fn names(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let disabled = self.disabled_tools.read().await;

        tools
            .iter()
            .map(|t| t.name())
            .filter(|name| !disabled.contains_key(*name))
            .map(str::to_string)
            .collect()
    }

    /// Tool definitions for the model
    pub async fn specs(&self) -> Vec<ToolSpec> {
        let tools = self.tools.read().await;
        let disabled = self.disabled_tools.read().await;

        tools
            .iter()
            .filter(|t| !disabled.contains_key(t.name()))
            .map(|t| t.spec())
            .collect()
    }

    /// Execute a tool call with error isolation
    pub async fn execute_tool(&self, name: &str, input: Value) -> Result<Value> {
        if let Some(reason) = self.disabled_tools.read().await.get(name) {
            return Err(AgentError::ToolDisabled {
                tool_name: name.to_string(),
                reason: reason.clone(),
            });
        }

        let tool = self.get(name).await.ok_or_else(|| AgentError::ToolNotFound {
            tool_name: name.to_string(),
        })?;

        tracing::debug!(tool = %name, kind = ?tool.kind(), "executing tool");
        match tool.call(input).await {
            Ok(output) => Ok(output),
            Err(e @ AgentError::InvalidToolArguments { .. })
            | Err(e @ AgentError::ToolExecutionFailed { .. }) => Err(e),
            Err(e) => Err(AgentError::ToolExecutionFailed {
                tool_name: name.to_string(),
                error: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool {
        name: &'static str,
        description: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            self.description
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(json!({ "echo": input }))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        async fn call(&self, _input: Value) -> Result<Value> {
            Err(AgentError::ConnectionFailed {
                message: "refused".to_string(),
            })
        }
    }

    fn echo(name: &'static str, description: &'static str) -> Arc<dyn Tool> {
        Arc::new(EchoTool { name, description })
    }

    #[tokio::test]
    async fn test_registration_order_and_replacement() {
        let registry = ToolRegistry::new();
        registry.register(echo("weather", "v1")).await;
        registry.register(echo("search_places", "places")).await;
        registry.register(echo("weather", "v2")).await;

        assert_eq!(registry.names().await, vec!["weather", "search_places"]);
        let specs = registry.specs().await;
        assert_eq!(specs[0].description, "v2");
        assert_eq!(specs[0].input_schema["required"], json!(["query"]));
    }

    #[tokio::test]
    async fn test_execute_unknown_and_disabled() {
        let registry = ToolRegistry::new();
        registry.register(echo("weather", "Get weather")).await;

        let err = registry.execute_tool("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound { tool_name } if tool_name == "missing"));

        registry.disable("weather", "maintenance").await;
        assert!(registry.specs().await.is_empty());
        assert!(!registry.has("weather").await);
        let err = registry.execute_tool("weather", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolDisabled { .. }));

        registry.enable("weather").await;
        let out = registry.execute_tool("weather", json!({"lat": 1})).await.unwrap();
        assert_eq!(out, json!({"echo": {"lat": 1}}));
    }

    #[tokio::test]
    async fn test_tool_errors_are_wrapped() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool)).await;

        let err = registry.execute_tool("broken", json!({})).await.unwrap_err();
        match err {
            AgentError::ToolExecutionFailed { tool_name, error } => {
                assert_eq!(tool_name, "broken");
                assert!(error.contains("refused"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}

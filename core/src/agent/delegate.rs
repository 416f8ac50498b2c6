//! The delegated agent
//!
//! A tool-using agent the bot hands location and weather questions to. It
//! reasons on a Bedrock model, calling the weather tool and every tool the
//! configured MCP servers expose, until the model ends its turn.

use crate::agent::tool_registry::ToolRegistry;
use crate::agent::tools::{McpTool, WeatherTool};
use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::llm::{
    BedrockModel, ChatMessage, ChatModel, ChatRequest, ContentBlock, InferenceConfig, RetryConfig,
    RetryModel, StopReason, TokenUsage,
};
use crate::mcp::McpClient;
use futures::future::join_all;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Outcome of one agent loop
#[derive(Debug, Clone)]
pub struct AgentRun {
    /// Final assistant text, before answer extraction
    pub text: String,
    pub stop_reason: StopReason,
    /// Model calls made
    pub iterations: usize,
    pub tool_calls: usize,
    pub usage: TokenUsage,
}

pub struct DelegateAgent {
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    mcp_clients: Vec<Arc<McpClient>>,
    system_prompt: Option<String>,
    max_iterations: usize,
    inference: InferenceConfig,
    closed: AtomicBool,
}

impl DelegateAgent {
    /// Assemble an agent around any model and tool set
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolRegistry) -> Self {
        Self {
            model,
            tools,
            mcp_clients: Vec::new(),
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            inference: InferenceConfig::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Build the production agent: Bedrock model, MCP servers, weather tool.
    ///
    /// Any MCP server failing to start fails construction.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let delegate = &config.delegate;
        let bedrock = BedrockModel::from_settings(&config.aws, &delegate.model_id).await?;
        let model: Arc<dyn ChatModel> =
            Arc::new(RetryModel::new(Arc::new(bedrock), RetryConfig::default()));

        let tools = ToolRegistry::new();
        let timeout = Duration::from_secs(delegate.mcp_timeout_secs);
        let mut clients = Vec::with_capacity(delegate.mcp_servers.len());

        for server in &delegate.mcp_servers {
            let client = Arc::new(McpClient::spawn(server, &config.aws, timeout).await?);
            for tool in McpTool::discover(client.clone()).await? {
                tools.register(Arc::new(tool)).await;
            }
            clients.push(client);
        }
        tools.register(Arc::new(WeatherTool::new(&config.weather))).await;

        let names = tools.names().await;
        tracing::info!(
            model = %delegate.model_id,
            tools = ?names,
            "delegate agent ready"
        );

        let mut agent = Self::new(model, tools)
            .with_max_iterations(delegate.max_iterations)
            .with_inference(InferenceConfig::new(delegate.max_tokens, delegate.temperature));
        agent.system_prompt = delegate.system_prompt.clone();
        agent.mcp_clients = clients;
        Ok(agent)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn tool_names(&self) -> Vec<String> {
        self.tools.names().await
    }

    /// Run the reasoning loop on a fresh conversation.
    ///
    /// Tool failures go back to the model as error results; only model
    /// failures and the iteration limit end the run with an error.
    pub async fn run(&self, input: &str) -> Result<AgentRun> {
        let specs = self.tools.specs().await;
        let mut messages = vec![ChatMessage::user(input)];
        let mut usage = TokenUsage::default();
        let mut tool_calls = 0;

        for iteration in 1..=self.max_iterations {
            let request = ChatRequest {
                system: self.system_prompt.clone(),
                messages: messages.clone(),
                tools: specs.clone(),
                inference: self.inference.clone(),
            };
            let response = self.model.converse(&request).await?;
            usage += response.usage;

            let tool_uses = response.message.tool_uses();
            let wants_tools = response.stop_reason == StopReason::ToolUse && !tool_uses.is_empty();
            let text = response.message.text();
            let mut message = response.message;
            message
                .content
                .retain(|block| !matches!(block, ContentBlock::Text { text } if text.trim().is_empty()));
            if !message.content.is_empty() {
                messages.push(message);
            }

            if !wants_tools {
                tracing::debug!(iteration, tool_calls, "delegate agent finished: {}", usage);
                return Ok(AgentRun {
                    text,
                    stop_reason: response.stop_reason,
                    iterations: iteration,
                    tool_calls,
                    usage,
                });
            }

            let mut results = Vec::with_capacity(tool_uses.len());
            for tool_use in tool_uses {
                tool_calls += 1;
                tracing::info!(tool = %tool_use.name, input = %tool_use.input, "delegate tool call");
                let block = match self.tools.execute_tool(&tool_use.name, tool_use.input).await {
                    Ok(output) => ContentBlock::tool_result(tool_use.id, output, false),
                    Err(e) => {
                        tracing::warn!(tool = %tool_use.name, "tool call failed: {}", e);
                        ContentBlock::tool_result(tool_use.id, Value::String(e.to_string()), true)
                    }
                };
                results.push(block);
            }
            messages.push(ChatMessage::tool_results(results));
        }

        Err(AgentError::IterationLimit {
            max_iterations: self.max_iterations,
        })
    }

    /// Ask the agent a question and return its extracted answer, if any
    pub async fn query(&self, input: &str) -> Result<Option<String>> {
        let run = self.run(input).await?;
        let answer = extract_answer(&run.text).trim();
        if answer.is_empty() {
            return Ok(None);
        }
        Ok(Some(answer.to_string()))
    }

    /// Invoke a tool directly, skipping the model.
    ///
    /// String input is parsed as JSON when possible, a `query` field is
    /// unwrapped, and the tool receives `{"query": <value>}`.
    pub async fn call_tool(&self, tool_name: &str, input: Value) -> Result<Value> {
        let input = match input {
            Value::String(s) => serde_json::from_str::<Value>(&s).unwrap_or(Value::String(s)),
            other => other,
        };
        let query = match input {
            Value::Object(mut map) => match map.remove("query") {
                Some(query) => query,
                None => Value::Object(map),
            },
            other => other,
        };

        self.tools
            .execute_tool(tool_name, json!({ "query": query }))
            .await
    }

    /// Shut down every MCP server. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let results = join_all(self.mcp_clients.iter().map(|client| client.close())).await;
        for (client, result) in self.mcp_clients.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(server = %client.name(), "failed to close MCP server: {}", e);
            }
        }
        tracing::info!("delegate agent closed");
    }
}

fn tag_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?s)<response>(.*?)</response>").unwrap(),
            Regex::new(r"(?s)<answer>(.*?)</answer>").unwrap(),
        ]
    })
}

/// Content of the first `<response>` block, else the first `<answer>`
/// block, else the whole text.
pub fn extract_answer(text: &str) -> &str {
    tag_patterns()
        .iter()
        .find_map(|re| re.captures(text).and_then(|c| c.get(1)))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

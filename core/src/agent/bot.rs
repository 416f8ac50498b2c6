//! The front conversation
//!
//! A health-information assistant that answers directly and hands location
//! and weather questions to the delegate agent through one function,
//! `handle_query`.

use crate::agent::delegate::DelegateAgent;
use crate::config::BotConfig;
use crate::error::{AgentError, Result};
use crate::llm::{
    ChatMessage, ChatModel, ChatRequest, ContentBlock, InferenceConfig, MessageRole, StopReason,
    TokenUsage, ToolSpec,
};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::session::{Connection, ConnectionEvent};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const HANDLE_QUERY: &str = "handle_query";

const NO_QUERY: &str = "No query provided.";
const QUERY_FAILED: &str = "I couldn't process that request.";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Function definition the bot model sees
pub fn handle_query_spec() -> ToolSpec {
    ToolSpec {
        name: HANDLE_QUERY.to_string(),
        description: "Delegates queries to an agent that can access location and weather information"
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The query to delegate to the agent"
                }
            },
            "required": ["query"]
        }),
    }
}

/// Runs `handle_query` calls against the shared delegate agent
#[derive(Clone)]
pub struct QueryHandler {
    agent: Arc<DelegateAgent>,
}

impl QueryHandler {
    pub fn new(agent: Arc<DelegateAgent>) -> Self {
        Self { agent }
    }

    pub fn agent(&self) -> &Arc<DelegateAgent> {
        &self.agent
    }

    /// Result object for the bot model. Never fails; agent errors are
    /// logged and reported as an unanswerable request.
    pub async fn handle(&self, arguments: &Value) -> Value {
        let Some(query) = query_text(arguments) else {
            return json!({ "result": NO_QUERY });
        };
        let query = query.as_str();

        tracing::info!(query, "delegating query");
        let result = match self.agent.query(query).await {
            Ok(Some(answer)) => answer,
            Ok(None) => QUERY_FAILED.to_string(),
            Err(e) => {
                tracing::error!(query, "delegate agent failed: {}", e);
                QUERY_FAILED.to_string()
            }
        };

        json!({
            "result": result,
            "query": query,
            "timestamp": chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        })
    }
}

/// The `query` argument as text. Empty or falsy values (null, false, 0,
/// empty collections) count as missing; other scalars are stringified.
fn query_text(arguments: &Value) -> Option<String> {
    let query = match arguments.get("query")? {
        Value::String(s) => s.trim().to_string(),
        Value::Null | Value::Bool(false) => return None,
        Value::Number(n) if n.as_f64() == Some(0.0) => return None,
        Value::Array(items) if items.is_empty() => return None,
        Value::Object(fields) if fields.is_empty() => return None,
        other => other.to_string(),
    };
    Some(query).filter(|q| !q.is_empty())
}

/// History and settings of one bot session
pub struct Conversation {
    system: String,
    messages: Vec<ChatMessage>,
    tools: Vec<ToolSpec>,
    inference: InferenceConfig,
    max_tool_rounds: usize,
    usage: TokenUsage,
}

impl Conversation {
    /// New conversation seeded with the greeting as the first user turn
    pub fn new(config: &BotConfig) -> Self {
        Self {
            system: config.system_instruction.clone(),
            messages: vec![ChatMessage::user(config.greeting.clone())],
            tools: vec![handle_query_spec()],
            inference: InferenceConfig::new(config.max_tokens, config.temperature),
            max_tool_rounds: config.max_tool_rounds,
            usage: TokenUsage::default(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Append user text, merging into a trailing user turn so roles keep
    /// alternating
    pub fn push_user(&mut self, text: impl Into<String>) {
        match self.messages.last_mut() {
            Some(last) if last.role == MessageRole::User => {
                last.content.push(ContentBlock::text(text));
            }
            _ => self.messages.push(ChatMessage::user(text)),
        }
    }

    /// Produce the assistant's next turn, running `handle_query` calls until
    /// the model ends the turn. Every step is reported to `sink`.
    pub async fn respond<F>(
        &mut self,
        model: &dyn ChatModel,
        handler: &QueryHandler,
        mut sink: F,
    ) -> Result<()>
    where
        F: FnMut(ServerFrame) + Send,
    {
        for _ in 0..=self.max_tool_rounds {
            let request = ChatRequest {
                system: Some(self.system.clone()),
                messages: self.messages.clone(),
                tools: self.tools.clone(),
                inference: self.inference.clone(),
            };
            let response = model.converse(&request).await?;
            self.usage += response.usage;

            let text = response.message.text();
            let tool_uses = response.message.tool_uses();
            let wants_tools = response.stop_reason == StopReason::ToolUse && !tool_uses.is_empty();

            // Converse rejects blank text blocks and empty turns on every later request
            let mut message = response.message;
            message
                .content
                .retain(|block| !matches!(block, ContentBlock::Text { text } if text.trim().is_empty()));
            if !message.content.is_empty() {
                self.messages.push(message);
            }

            if !text.trim().is_empty() {
                sink(ServerFrame::AssistantText {
                    text: text.trim().to_string(),
                });
            }
            if !wants_tools {
                if !tool_uses.is_empty() {
                    // turn was cut off mid call; every tool use still needs a result
                    tracing::warn!(stop_reason = ?response.stop_reason, "turn ended with unanswered tool calls");
                    let results = tool_uses
                        .into_iter()
                        .map(|tool_use| {
                            ContentBlock::tool_result(
                                tool_use.id,
                                json!({ "error": "the turn ended before this call ran" }),
                                true,
                            )
                        })
                        .collect();
                    self.messages.push(ChatMessage::tool_results(results));
                }
                return Ok(());
            }

            let mut results = Vec::with_capacity(tool_uses.len());
            for tool_use in tool_uses {
                sink(ServerFrame::ToolCall {
                    call_id: tool_use.id.clone(),
                    name: tool_use.name.clone(),
                    arguments: tool_use.input.clone(),
                });

                let (result, is_error) = if tool_use.name == HANDLE_QUERY {
                    (handler.handle(&tool_use.input).await, false)
                } else {
                    tracing::warn!(function = %tool_use.name, "model called an unknown function");
                    (
                        json!({ "error": format!("unknown function: {}", tool_use.name) }),
                        true,
                    )
                };

                sink(ServerFrame::ToolResult {
                    call_id: tool_use.id.clone(),
                    name: tool_use.name.clone(),
                    result: result.clone(),
                });
                results.push(ContentBlock::tool_result(tool_use.id, result, is_error));
            }
            self.messages.push(ChatMessage::tool_results(results));
        }

        Err(AgentError::IterationLimit {
            max_iterations: self.max_tool_rounds,
        })
    }
}

/// Everything a bot session needs, shared by all sessions
pub struct BotContext {
    pub name: String,
    pub model: Arc<dyn ChatModel>,
    pub handler: QueryHandler,
    pub config: BotConfig,
}

fn error_code(err: &AgentError) -> &'static str {
    match err {
        AgentError::Throttled { .. }
        | AgentError::ModelUnavailable { .. }
        | AgentError::ServiceUnavailable => "model_busy",
        AgentError::IterationLimit { .. } => "too_many_steps",
        AgentError::Unauthorized { .. } | AgentError::MissingConfig { .. } => "not_configured",
        _ => "model_error",
    }
}

/// Run one bot session until the client closes, the connection closes, or
/// `shutdown` fires.
pub async fn run_bot(connection: Arc<Connection>, ctx: Arc<BotContext>, shutdown: CancellationToken) {
    let pc_id = connection.pc_id().to_string();
    let Some(mut events) = connection.take_events() else {
        tracing::warn!(pc_id = %pc_id, "bot already running for connection");
        return;
    };

    tracing::info!(pc_id = %pc_id, bot = %ctx.name, "starting bot");
    let closed = connection.close_token();
    let idle_timeout = Duration::from_secs(ctx.config.idle_timeout_secs);
    let mut conversation = Conversation::new(&ctx.config);
    let mut greeted = false;
    // set while no socket is attached
    let mut idle_deadline = Some(Instant::now() + idle_timeout);

    loop {
        let idle = async move {
            match idle_deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = closed.cancelled() => break,
            _ = idle => {
                tracing::info!(pc_id = %pc_id, "no client attached for {:?}, closing", idle_timeout);
                break;
            }
            event = events.recv() => event,
        };

        match event {
            Some(ConnectionEvent::Connected) => {
                idle_deadline = None;
                if greeted {
                    continue;
                }
                greeted = true;
            }
            Some(ConnectionEvent::Frame(ClientFrame::UserText { text })) => {
                if text.trim().is_empty() {
                    continue;
                }
                conversation.push_user(text);
            }
            Some(ConnectionEvent::Disconnected) => {
                tracing::debug!(pc_id = %pc_id, "waiting for client to reconnect");
                idle_deadline = Some(Instant::now() + idle_timeout);
                continue;
            }
            Some(ConnectionEvent::Frame(ClientFrame::Close)) | None => break,
        }

        let sink = |frame: ServerFrame| connection.send(frame);
        let outcome = tokio::select! {
            result = conversation.respond(ctx.model.as_ref(), &ctx.handler, sink) => Some(result),
            _ = shutdown.cancelled() => None,
            _ = closed.cancelled() => None,
        };
        match outcome {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                if e.requires_user_action() {
                    tracing::error!(pc_id = %pc_id, "bot turn failed: {}", e);
                } else {
                    tracing::warn!(pc_id = %pc_id, "bot turn failed: {}", e);
                }
                connection.send(ServerFrame::error(error_code(&e), e.user_message()));
            }
            None => break,
        }
    }

    connection.send(ServerFrame::Closed);
    connection.close();
    tracing::info!(pc_id = %pc_id, "bot session ended. {}", conversation.usage());
}

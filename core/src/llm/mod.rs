//! Model client module
//!
//! A small provider-neutral surface over chat models:
//! - `ChatModel`: the trait both agents talk to
//! - `BedrockModel`: AWS Bedrock Converse API implementation
//! - `RetryModel`: backoff wrapper for transient provider failures

pub mod bedrock;
pub mod chat;
pub mod document;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use bedrock::BedrockModel;
pub use chat::{
    ChatMessage, ChatRequest, ChatResponse, ContentBlock, InferenceConfig, MessageRole,
    StopReason, TokenUsage, ToolSpec, ToolUse,
};
pub use retry::{RetryConfig, RetryModel};
#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedModel;

use crate::error::Result;
use async_trait::async_trait;

/// A chat model that can be asked for the next assistant turn.
///
/// Implementations must be `Send + Sync` so one model can serve every session.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier (e.g. "amazon.nova-lite-v1:0")
    fn model_id(&self) -> &str;

    /// Produce the next assistant message for the conversation in `request`
    async fn converse(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

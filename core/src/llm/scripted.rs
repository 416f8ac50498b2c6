//! Scripted chat model for tests
//!
//! Replays a fixed queue of responses and records every request it sees.

use super::{
    ChatMessage, ChatModel, ChatRequest, ChatResponse, ContentBlock, MessageRole, StopReason,
    TokenUsage,
};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;

pub struct ScriptedModel {
    model_id: String,
    responses: Mutex<VecDeque<Result<ChatResponse>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Script that may also return errors
    pub fn with_results(results: Vec<Result<ChatResponse>>) -> Self {
        Self {
            model_id: "scripted".to_string(),
            responses: Mutex::new(results.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Plain text assistant turn
    pub fn text_response(text: impl Into<String>) -> ChatResponse {
        ChatResponse {
            message: ChatMessage::assistant(text),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::new(10, 5),
        }
    }

    /// Assistant turn asking for one tool call
    pub fn tool_use_response(id: &str, name: &str, input: Value) -> ChatResponse {
        ChatResponse {
            message: ChatMessage {
                role: MessageRole::Assistant,
                content: vec![ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input,
                }],
            },
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::new(10, 5),
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn converse(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| {
                Err(AgentError::Internal {
                    message: "scripted model has no more responses".to_string(),
                })
            })
    }
}

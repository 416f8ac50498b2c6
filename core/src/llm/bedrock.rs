//! AWS Bedrock model client
//!
//! Uses the Converse API, which gives every Bedrock chat model (Nova, Claude,
//! Llama, ...) the same message and tool-use shape.

use super::chat::{
    ChatMessage, ChatRequest, ChatResponse, ContentBlock, MessageRole, StopReason, TokenUsage,
    ToolSpec,
};
use super::document::{document_to_json, json_to_document};
use super::ChatModel;
use crate::config::AwsSettings;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use aws_sdk_bedrockruntime::config::{Credentials, Region};
use aws_sdk_bedrockruntime::error::{BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockruntime::operation::converse::{ConverseError, ConverseOutput as ConverseResponse};
use aws_sdk_bedrockruntime::types::{
    ContentBlock as SdkContentBlock, ConversationRole, ConverseOutput as SdkOutput,
    InferenceConfiguration, Message, StopReason as SdkStopReason, SystemContentBlock, Tool,
    ToolConfiguration, ToolInputSchema, ToolResultBlock, ToolResultContentBlock, ToolResultStatus,
    ToolSpecification, ToolUseBlock,
};
use aws_sdk_bedrockruntime::Client;
use serde_json::Value;
use std::time::Instant;

const CREDENTIALS_PROVIDER: &str = "delegated-agent-env";

/// Bedrock Converse client bound to one model id
#[derive(Clone)]
pub struct BedrockModel {
    client: Client,
    model_id: String,
}

impl BedrockModel {
    /// Build a client with explicit static credentials and region
    pub async fn from_settings(aws: &AwsSettings, model_id: impl Into<String>) -> Result<Self> {
        let (access_key_id, secret_access_key) = aws.require_credentials()?;
        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            aws.session_token.clone(),
            None,
            CREDENTIALS_PROVIDER,
        );

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(aws.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let model_id = model_id.into();
        tracing::debug!(model = %model_id, region = %aws.region, "created Bedrock client");

        Ok(Self {
            client: Client::new(&sdk_config),
            model_id,
        })
    }
}

#[async_trait]
impl ChatModel for BedrockModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn converse(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let messages = request
            .messages
            .iter()
            .map(to_sdk_message)
            .collect::<Result<Vec<_>>>()?;

        let mut call = self
            .client
            .converse()
            .model_id(&self.model_id)
            .set_messages(Some(messages))
            .inference_config(
                InferenceConfiguration::builder()
                    .set_max_tokens(request.inference.max_tokens.map(|t| t.min(i32::MAX as u32) as i32))
                    .set_temperature(request.inference.temperature)
                    .build(),
            );

        if let Some(system) = &request.system {
            call = call.system(SystemContentBlock::Text(system.clone()));
        }
        if !request.tools.is_empty() {
            call = call.tool_config(to_tool_config(&request.tools)?);
        }

        let started = Instant::now();
        let output = call
            .send()
            .await
            .map_err(|e| map_converse_error(&self.model_id, e))?;

        let response = from_sdk_response(&output)?;
        tracing::info!(
            model = %self.model_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            stop_reason = ?response.stop_reason,
            "Converse completed: {}",
            response.usage
        );
        Ok(response)
    }
}

fn build_error(e: BuildError) -> AgentError {
    AgentError::Internal {
        message: format!("failed to build Bedrock request: {}", e),
    }
}

pub(crate) fn to_sdk_message(message: &ChatMessage) -> Result<Message> {
    let role = match message.role {
        MessageRole::User => ConversationRole::User,
        MessageRole::Assistant => ConversationRole::Assistant,
    };

    let content = message
        .content
        .iter()
        .map(to_sdk_block)
        .collect::<Result<Vec<_>>>()?;

    Message::builder()
        .role(role)
        .set_content(Some(content))
        .build()
        .map_err(build_error)
}

fn to_sdk_block(block: &ContentBlock) -> Result<SdkContentBlock> {
    match block {
        ContentBlock::Text { text } => Ok(SdkContentBlock::Text(text.clone())),
        ContentBlock::ToolUse { id, name, input } => ToolUseBlock::builder()
            .tool_use_id(id)
            .name(name)
            .input(json_to_document(input))
            .build()
            .map(SdkContentBlock::ToolUse)
            .map_err(build_error),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let result_content = match content {
                Value::String(text) => ToolResultContentBlock::Text(text.clone()),
                // Bedrock only accepts JSON objects as structured tool results
                Value::Object(_) => ToolResultContentBlock::Json(json_to_document(content)),
                other => ToolResultContentBlock::Json(json_to_document(
                    &serde_json::json!({ "result": other }),
                )),
            };
            let mut builder = ToolResultBlock::builder()
                .tool_use_id(tool_use_id)
                .content(result_content);
            if *is_error {
                builder = builder.status(ToolResultStatus::Error);
            }
            builder
                .build()
                .map(SdkContentBlock::ToolResult)
                .map_err(build_error)
        }
    }
}

fn to_tool_config(tools: &[ToolSpec]) -> Result<ToolConfiguration> {
    let mut builder = ToolConfiguration::builder();
    for tool in tools {
        let spec = ToolSpecification::builder()
            .name(&tool.name)
            .description(&tool.description)
            .input_schema(ToolInputSchema::Json(json_to_document(&tool.input_schema)))
            .build()
            .map_err(build_error)?;
        builder = builder.tools(Tool::ToolSpec(spec));
    }
    builder.build().map_err(build_error)
}

fn from_sdk_response(output: &ConverseResponse) -> Result<ChatResponse> {
    let message = match output.output() {
        Some(SdkOutput::Message(message)) => from_sdk_message(message),
        _ => {
            return Err(AgentError::ProviderError {
                status: 200,
                message: "Converse response did not contain a message".to_string(),
            })
        }
    };

    let usage = output
        .usage()
        .map(|u| TokenUsage::new(u.input_tokens().max(0) as u32, u.output_tokens().max(0) as u32))
        .unwrap_or_default();

    Ok(ChatResponse {
        message,
        stop_reason: map_stop_reason(output.stop_reason()),
        usage,
    })
}

pub(crate) fn from_sdk_message(message: &Message) -> ChatMessage {
    let role = match message.role() {
        ConversationRole::User => MessageRole::User,
        _ => MessageRole::Assistant,
    };

    let content = message
        .content()
        .iter()
        .filter_map(|block| match block {
            SdkContentBlock::Text(text) => Some(ContentBlock::text(text.clone())),
            SdkContentBlock::ToolUse(tool_use) => Some(ContentBlock::ToolUse {
                id: tool_use.tool_use_id().to_string(),
                name: tool_use.name().to_string(),
                input: document_to_json(tool_use.input()),
            }),
            other => {
                tracing::trace!("skipping unsupported content block: {:?}", other);
                None
            }
        })
        .collect();

    ChatMessage { role, content }
}

pub(crate) fn map_stop_reason(reason: &SdkStopReason) -> StopReason {
    match reason {
        SdkStopReason::EndTurn => StopReason::EndTurn,
        SdkStopReason::ToolUse => StopReason::ToolUse,
        SdkStopReason::MaxTokens => StopReason::MaxTokens,
        SdkStopReason::StopSequence => StopReason::StopSequence,
        other => StopReason::Other(other.as_str().to_string()),
    }
}

fn map_converse_error<R: std::fmt::Debug>(
    model_id: &str,
    err: SdkError<ConverseError, R>,
) -> AgentError {
    if let Some(service_err) = err.as_service_error() {
        let message = service_err.message().unwrap_or("no message").to_string();
        return match service_err {
            ConverseError::ThrottlingException(_) => AgentError::Throttled {
                service: "bedrock".to_string(),
                message,
            },
            ConverseError::ServiceUnavailableException(_) => AgentError::ServiceUnavailable,
            ConverseError::ModelNotReadyException(_) => AgentError::ModelUnavailable {
                model: model_id.to_string(),
                message,
            },
            ConverseError::AccessDeniedException(_) => AgentError::Unauthorized { message },
            ConverseError::ValidationException(_)
            | ConverseError::ResourceNotFoundException(_) => AgentError::ProviderError {
                status: 400,
                message,
            },
            ConverseError::ModelTimeoutException(_) => AgentError::ProviderError {
                status: 504,
                message,
            },
            _ => AgentError::ProviderError {
                status: 500,
                message,
            },
        };
    }

    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => AgentError::ConnectionFailed {
            message: format!("{}", DisplayErrorContext(&err)),
        },
        _ => AgentError::Http(format!("{}", DisplayErrorContext(&err))),
    }
}

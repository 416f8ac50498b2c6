//! Wire types for the signalling API and the session data channel

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MessageEnvelope<T> {
    pub v: u32,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<u64>,
    pub payload: T,
}

impl MessageEnvelope<ServerFrame> {
    pub fn event(event_id: u64, frame: ServerFrame) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            msg_type: "event".to_string(),
            request_id: None,
            event_id: Some(event_id),
            payload: frame,
        }
    }
}

/// Client → server data channel frame
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    UserText { text: String },
    Close,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IncomingFrame {
    Envelope(MessageEnvelope<ClientFrame>),
    Bare(ClientFrame),
}

/// Parse a client text frame, bare or wrapped in an envelope
pub fn parse_client_frame(text: &str) -> Result<ClientFrame> {
    match serde_json::from_str::<IncomingFrame>(text) {
        Ok(IncomingFrame::Envelope(envelope)) => Ok(envelope.payload),
        Ok(IncomingFrame::Bare(frame)) => Ok(frame),
        Err(e) => Err(AgentError::InvalidInput {
            message: format!("unrecognized client frame: {}", e),
        }),
    }
}

/// Server → client data channel frame
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AssistantText {
        text: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        name: String,
        result: Value,
    },
    Error {
        code: String,
        message: String,
    },
    Closed,
}

impl ServerFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AssistantText { .. } => "assistant_text",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::Closed => "closed",
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

/// Body of `POST /api/offer`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OfferRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pc_id: Option<String>,
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    #[serde(default)]
    pub restart_pc: bool,
}

impl OfferRequest {
    pub fn description(&self) -> SessionDescription {
        SessionDescription {
            sdp: self.sdp.clone(),
            sdp_type: self.sdp_type.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Answer {
    pub pc_id: String,
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    /// Data channel endpoint for this connection
    pub ws_url: String,
}

/// Body of `GET /api/health`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub bot: String,
    pub connections: usize,
}

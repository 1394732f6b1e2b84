//! Wire types for chat-completion calls and the proxy surface

use crate::session::{ChatMessage, MessageKind};
use serde::{Deserialize, Serialize};

/// One message on the chat-completions wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// `system`, `user` or `assistant`
    pub role: String,
    /// Message text
    pub content: String,
}

impl WireMessage {
    /// System prompt message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.kind.wire_role().to_string(),
            content: message.content.clone(),
        }
    }
}

/// `POST {baseURL}/chat/completions` body
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    /// Model identifier
    pub model: String,
    /// Prompt, history and new message
    pub messages: Vec<WireMessage>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Completion token cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Whether to stream the reply
    pub stream: bool,
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens in the completion
    #[serde(default)]
    pub completion_tokens: u64,
    /// Sum of both
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResponseChoice {
    pub message: ResponseMessage,
}

/// Non-streaming completion response
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ResponseChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatCompletionResponse {
    /// Content of the first choice
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

/// One streamed `data:` payload
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// `GET {baseURL}/models` response
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ModelList {
    #[serde(default)]
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ModelEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// History entry as exchanged with the proxy (`{type, content}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyHistoryEntry {
    /// Author
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Text
    pub content: String,
}

impl From<&ChatMessage> for ProxyHistoryEntry {
    fn from(message: &ChatMessage) -> Self {
        Self {
            kind: message.kind,
            content: message.content.clone(),
        }
    }
}

/// `POST /api/chat` body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyChatRequest {
    /// New user message
    #[serde(default)]
    pub message: Option<String>,
    /// Prior turns
    #[serde(default)]
    pub history: Vec<ProxyHistoryEntry>,
}

/// `POST /api/chat` success metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyChatMeta {
    /// Model that answered
    #[serde(default)]
    pub model: String,
    /// Provider label
    #[serde(default)]
    pub api: String,
    /// Token accounting
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Number of wire messages sent upstream
    #[serde(default)]
    pub message_count: usize,
}

/// `POST /api/chat` success body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyChatResponse {
    /// Assistant reply
    pub response: String,
    /// Call metadata
    #[serde(default)]
    pub meta: ProxyChatMeta,
}

/// Error body of the proxy and of OpenAI-compatible providers
///
/// Providers nest the message (`{"error": {"message": ..}}`) while the
/// proxy puts a string in `error` and the detail in `message`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "retry_after")]
    pub retry_after: Option<serde_json::Value>,
    #[serde(default)]
    pub needs_config: bool,
}

impl ErrorBody {
    /// Best human-readable message in the body
    pub fn best_message(&self) -> Option<String> {
        let nested = self.error.as_ref().and_then(|e| match e {
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string),
            _ => None,
        });
        let flat = self.error.as_ref().and_then(|e| e.as_str()).map(str::to_string);
        nested.or_else(|| self.message.clone()).or(flat)
    }
}

/// Reply of a successful chat request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    /// Assistant message text
    pub content: String,
    /// Token accounting, when reported
    pub usage: Option<Usage>,
    /// Attempts it took, including the successful one
    pub attempts: u32,
}

/// Outcome of a configuration test; never an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    /// Whether the provider answered
    pub success: bool,
    /// Human-readable explanation
    pub message: String,
    /// Reply text on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl ConnectionTestResult {
    /// Failed test with `message`
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            response: None,
        }
    }
}

/// Reachability of the provider base URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the base URL answered with a success status
    pub healthy: bool,
    /// Status code, when a response arrived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Human-readable explanation
    pub message: String,
}

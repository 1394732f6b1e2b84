//! Chat-completion request client
//!
//! [`ChatClient`] turns a user message plus the prior turns of a session
//! into one chat-completion call, either straight to an OpenAI-compatible
//! provider or through the `chatroom serve` proxy. Rate limiting (HTTP 429)
//! and transport failures are retried with exponential backoff; every
//! other failure surfaces immediately.

use crate::api_config::{validate, ApiConfig, ConfigStore};
use crate::error::{ChatroomError, Result};
use crate::session::ChatMessage;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;

pub mod backoff;
pub mod metrics;
pub mod sse;
pub mod types;

pub use backoff::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use types::{ChatReply, ConnectionTestResult, HealthStatus, Usage, WireMessage};

use backoff::{parse_retry_after, parse_retry_after_json, DEFAULT_RATE_LIMIT_WAIT};
use metrics::RequestMetrics;
use sse::{SseLineParser, StreamEvent};
use types::{
    ChatCompletionRequest, ChatCompletionResponse, ErrorBody, ModelList, ProxyChatRequest,
    ProxyChatResponse, ProxyHistoryEntry,
};

/// Default number of prior messages sent with each request
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Default system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Answer questions thoroughly and accurately.";

const TEST_SYSTEM_PROMPT: &str = "You are an AI assistant.";
const TEST_USER_PROMPT: &str = "Hello, please reply briefly.";
const TEST_MAX_TOKENS: u32 = 50;
const TEST_TEMPERATURE: f64 = 0.7;
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Where chat requests are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST {baseURL}/chat/completions` with the local configuration
    Direct,
    /// `POST {url}/api/chat`; the proxy holds the provider configuration
    Proxy {
        /// Proxy base URL, e.g. `http://127.0.0.1:3000`
        url: String,
    },
}

impl Endpoint {
    fn label(&self) -> &'static str {
        match self {
            Endpoint::Direct => "direct",
            Endpoint::Proxy { .. } => "proxy",
        }
    }
}

/// Capability to send one chat message with prior turns
///
/// The orchestrator depends on this trait rather than on [`ChatClient`]
/// so front-ends and tests can substitute their own transport.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send `message` after `history` and return the assistant reply
    async fn send_chat_request(&self, message: &str, history: &[ChatMessage])
        -> Result<ChatReply>;

    /// Like [`send_chat_request`](Self::send_chat_request), reporting text
    /// as it arrives
    ///
    /// The default implementation reports the whole reply at once.
    async fn send_chat_request_streaming(
        &self,
        message: &str,
        history: &[ChatMessage],
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<ChatReply> {
        let reply = self.send_chat_request(message, history).await?;
        on_delta(&reply.content);
        Ok(reply)
    }

    /// Whether the local provider configuration must be complete to send
    fn requires_local_config(&self) -> bool {
        true
    }
}

/// HTTP chat-completion client with retry and backoff
pub struct ChatClient {
    http: Client,
    config: Arc<ConfigStore>,
    endpoint: Endpoint,
    policy: RetryPolicy,
    history_limit: usize,
    system_prompt: String,
    sleeper: Arc<dyn Sleeper>,
}

impl ChatClient {
    /// Create a direct client with default policy
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            http: Client::new(),
            config,
            endpoint: Endpoint::Direct,
            policy: RetryPolicy::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Send requests to `endpoint`
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Use `policy` for retries
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Send at most `limit` prior messages
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Replace the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Wait between attempts with `sleeper`
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Apply a per-request timeout (none by default)
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        self.http = builder
            .build()
            .map_err(|e| ChatroomError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(self)
    }

    /// Configured endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Configured retry policy
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Provider configuration this client reads
    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Build the wire message list
    ///
    /// One system prompt, then the most recent `history_limit` entries of
    /// `history` oldest first, then `message`.
    pub fn build_messages(&self, message: &str, history: &[ChatMessage]) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(self.history_limit.min(history.len()) + 2);
        messages.push(WireMessage::system(self.system_prompt.clone()));
        messages.extend(self.recent(history).iter().map(WireMessage::from));
        messages.push(WireMessage::user(message));
        messages
    }

    fn recent<'a>(&self, history: &'a [ChatMessage]) -> &'a [ChatMessage] {
        let start = history.len().saturating_sub(self.history_limit);
        &history[start..]
    }

    fn configured_snapshot(&self) -> Result<ApiConfig> {
        let config = self.config.get();
        if !config.is_configured {
            return Err(ChatroomError::Config(
                "API key, base URL and model must be configured before chatting".to_string(),
            )
            .into());
        }
        Ok(config)
    }

    /// Issue the request built by `build`, retrying 429s and transport
    /// failures while attempts remain
    ///
    /// Returns the last response (successful or not) and the attempt
    /// number that produced it.
    async fn send_with_retry<F>(&self, metrics: &RequestMetrics, build: F) -> Result<(Response, u32)>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 1;
        loop {
            match build().send().await {
                Ok(response)
                    if response.status() == StatusCode::TOO_MANY_REQUESTS
                        && self.policy.has_attempts_after(attempt) =>
                {
                    let hint = retry_after_header(&response);
                    let wait = self.policy.delay_for(attempt, hint);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited, retrying"
                    );
                    metrics.record_retry("rate_limit");
                    self.sleeper.sleep(wait).await;
                }
                Ok(response) => return Ok((response, attempt)),
                Err(e) if self.policy.has_attempts_after(attempt) => {
                    let wait = self.policy.delay_for(attempt, None);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    metrics.record_retry("network");
                    self.sleeper.sleep(wait).await;
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "Request failed");
                    return Err(ChatroomError::Network(e.to_string()).into());
                }
            }
            attempt += 1;
        }
    }

    async fn send_direct(
        &self,
        message: &str,
        history: &[ChatMessage],
        on_delta: Option<&mut (dyn for<'a> FnMut(&'a str) + Send)>,
        metrics: &RequestMetrics,
    ) -> Result<ChatReply> {
        let config = self.configured_snapshot()?;
        let stream = on_delta.is_some();
        let body = ChatCompletionRequest {
            model: config.model.clone(),
            messages: self.build_messages(message, history),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream,
        };
        let url = config.chat_completions_url();
        tracing::debug!(
            url = %url,
            model = %body.model,
            messages = body.messages.len(),
            stream,
            "Sending chat request"
        );

        let (response, attempts) = self
            .send_with_retry(metrics, || {
                self.http
                    .post(&url)
                    .bearer_auth(&config.api_key)
                    .json(&body)
            })
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }

        match on_delta {
            Some(on_delta) => {
                let content = read_stream(response, on_delta).await?;
                Ok(ChatReply {
                    content,
                    usage: None,
                    attempts,
                })
            }
            None => {
                let status = response.status().as_u16();
                let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
                    ChatroomError::Http {
                        status,
                        message: format!("Unreadable response body: {}", e),
                    }
                })?;
                let content = parsed
                    .first_content()
                    .ok_or_else(|| ChatroomError::Http {
                        status,
                        message: "Response contained no message content".to_string(),
                    })?
                    .to_string();
                Ok(ChatReply {
                    content,
                    usage: parsed.usage,
                    attempts,
                })
            }
        }
    }

    async fn send_proxy(
        &self,
        proxy_url: &str,
        message: &str,
        history: &[ChatMessage],
        metrics: &RequestMetrics,
    ) -> Result<ChatReply> {
        let url = format!("{}/api/chat", proxy_url.trim_end_matches('/'));
        let body = ProxyChatRequest {
            message: Some(message.to_string()),
            history: self
                .recent(history)
                .iter()
                .map(ProxyHistoryEntry::from)
                .collect(),
        };
        tracing::debug!(url = %url, history = body.history.len(), "Sending chat request via proxy");

        let (response, attempts) = self
            .send_with_retry(metrics, || self.http.post(&url).json(&body))
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }

        let status = response.status().as_u16();
        let parsed: ProxyChatResponse =
            response.json().await.map_err(|e| ChatroomError::Http {
                status,
                message: format!("Unreadable proxy response: {}", e),
            })?;
        Ok(ChatReply {
            content: parsed.response,
            usage: parsed.meta.usage,
            attempts,
        })
    }

    async fn dispatch(
        &self,
        message: &str,
        history: &[ChatMessage],
        on_delta: Option<&mut (dyn for<'a> FnMut(&'a str) + Send)>,
    ) -> Result<ChatReply> {
        let metrics = RequestMetrics::new(self.endpoint.label());
        let result = match &self.endpoint {
            Endpoint::Direct => self.send_direct(message, history, on_delta, &metrics).await,
            Endpoint::Proxy { url } => {
                let reply = self.send_proxy(url, message, history, &metrics).await;
                if let (Ok(reply), Some(on_delta)) = (&reply, on_delta) {
                    on_delta(&reply.content);
                }
                reply
            }
        };

        match &result {
            Ok(reply) => {
                metrics.record_success(reply.attempts);
                tracing::info!(
                    attempts = reply.attempts,
                    chars = reply.content.chars().count(),
                    "Chat request completed"
                );
            }
            Err(e) => {
                let kind = e
                    .downcast_ref::<ChatroomError>()
                    .map(|e| e.kind())
                    .unwrap_or("other");
                metrics.record_failure(kind);
                tracing::error!(kind, error = %e, "Chat request failed");
            }
        }
        result
    }

    /// Send a minimal prompt with `config`, without retrying
    ///
    /// Never fails: every problem is reported in the result with a
    /// status-specific explanation.
    pub async fn test_connection(&self, config: &ApiConfig) -> ConnectionTestResult {
        let errors = validate(config);
        if !errors.is_empty() {
            return ConnectionTestResult::failed(errors.join("; "));
        }

        let body = ChatCompletionRequest {
            model: config.model.clone(),
            messages: vec![
                WireMessage::system(TEST_SYSTEM_PROMPT),
                WireMessage::user(TEST_USER_PROMPT),
            ],
            temperature: Some(TEST_TEMPERATURE),
            max_tokens: Some(TEST_MAX_TOKENS),
            stream: false,
        };

        let response = match self
            .http
            .post(config.chat_completions_url())
            .bearer_auth(&config.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return ConnectionTestResult::failed(
                    "Request timed out; check the network connection",
                )
            }
            Err(e) => {
                return ConnectionTestResult::failed(format!(
                    "Network connection failed; check the network or base URL ({})",
                    e
                ))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            return ConnectionTestResult::failed(test_failure_message(status.as_u16(), &body));
        }

        match response.json::<ChatCompletionResponse>().await {
            Ok(parsed) => match parsed.first_content() {
                Some(content) => ConnectionTestResult {
                    success: true,
                    message: "Connection test succeeded".to_string(),
                    response: Some(content.to_string()),
                },
                None => ConnectionTestResult::failed("Unexpected response format"),
            },
            Err(_) => ConnectionTestResult::failed("Unexpected response format"),
        }
    }

    /// Model ids offered by the provider
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let config = self.config.get();
        if config.api_key.is_empty() || config.base_url.is_empty() {
            return Err(ChatroomError::Config(
                "API key and base URL are required to list models".to_string(),
            )
            .into());
        }

        let response = self
            .http
            .get(config.models_url())
            .bearer_auth(&config.api_key)
            .send()
            .await
            .map_err(|e| ChatroomError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }

        let status = response.status().as_u16();
        let list: ModelList = response.json().await.map_err(|e| ChatroomError::Http {
            status,
            message: format!("Unreadable model list: {}", e),
        })?;
        Ok(list
            .data
            .into_iter()
            .filter_map(|m| m.id.or(m.name))
            .filter(|id| !id.is_empty())
            .collect())
    }

    /// Probe the provider base URL
    pub async fn check_health(&self) -> HealthStatus {
        let config = self.config.get();
        if config.base_url.trim().is_empty() {
            return HealthStatus {
                healthy: false,
                status: None,
                message: "Base URL is not configured".to_string(),
            };
        }

        match self
            .http
            .get(config.base_url.trim())
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                HealthStatus {
                    healthy: status.is_success(),
                    status: Some(status.as_u16()),
                    message: if status.is_success() {
                        "Provider is reachable".to_string()
                    } else {
                        format!("HTTP {}", status.as_u16())
                    },
                }
            }
            Err(e) => HealthStatus {
                healthy: false,
                status: None,
                message: format!("Cannot reach provider: {}", e),
            },
        }
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn send_chat_request(
        &self,
        message: &str,
        history: &[ChatMessage],
    ) -> Result<ChatReply> {
        self.dispatch(message, history, None).await
    }

    async fn send_chat_request_streaming(
        &self,
        message: &str,
        history: &[ChatMessage],
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<ChatReply> {
        self.dispatch(message, history, Some(on_delta)).await
    }

    fn requires_local_config(&self) -> bool {
        matches!(self.endpoint, Endpoint::Direct)
    }
}

fn retry_after_header(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

/// Classify a non-success response
async fn error_from_response(response: Response) -> ChatroomError {
    let status = response.status();
    let header_hint = retry_after_header(&response);
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = header_hint
            .or_else(|| body.retry_after.as_ref().and_then(parse_retry_after_json))
            .unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
        return ChatroomError::RateLimit {
            retry_after,
            message: body
                .best_message()
                .unwrap_or_else(|| "Too many requests".to_string()),
        };
    }

    if body.needs_config {
        return ChatroomError::Config(
            body.best_message()
                .unwrap_or_else(|| "The server is not configured".to_string()),
        );
    }

    let message = body.best_message().unwrap_or_else(|| {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        } else {
            trimmed.chars().take(200).collect()
        }
    });
    ChatroomError::Http {
        status: status.as_u16(),
        message,
    }
}

/// Human explanation for a failed connection test
fn test_failure_message(status: u16, body: &ErrorBody) -> String {
    match status {
        401 => "Invalid or expired API key".to_string(),
        403 => "API key lacks permission".to_string(),
        404 => "Endpoint not found; check the base URL".to_string(),
        429 => "Too many requests; try again later".to_string(),
        500 => "Provider internal server error".to_string(),
        501..=599 => "Provider temporarily unavailable".to_string(),
        _ => body
            .best_message()
            .unwrap_or_else(|| format!("HTTP {}", status)),
    }
}

/// Drain a streamed completion, reporting each delta
async fn read_stream(
    response: Response,
    on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> Result<String> {
    let mut parser = SseLineParser::new();
    let mut content = String::new();
    let mut stream = response.bytes_stream();

    let mut apply = |events: Vec<StreamEvent>, content: &mut String| {
        for event in events {
            if let StreamEvent::Delta(text) = event {
                on_delta(&text);
                content.push_str(&text);
            }
        }
    };

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ChatroomError::Network(format!("Stream interrupted: {}", e)))?;
        apply(parser.push(&chunk), &mut content);
        if parser.is_done() {
            break;
        }
    }
    apply(parser.finish(), &mut content);

    Ok(content)
}

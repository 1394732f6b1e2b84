//! HTTP proxy for chat requests
//!
//! Holds the provider key server-side so browser front-ends only talk to
//! `/api/chat`. Each client address is limited to a fixed number of chat
//! requests per window before upstream retries even begin.

use crate::api_config::{ApiConfigUpdate, ConfigStore};
use crate::client::types::{ProxyChatMeta, ProxyChatRequest, ProxyChatResponse};
use crate::client::{ChatBackend, ChatClient};
use crate::config::ServerConfig;
use crate::error::{ChatroomError, Result};
use crate::session::ChatMessage;
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod rate_limit;

pub use rate_limit::RateLimiter;

/// Shared server state
pub struct AppState {
    config: Arc<ConfigStore>,
    client: ChatClient,
    limiter: RateLimiter,
    started: Instant,
}

impl AppState {
    /// Build server state around a direct chat client
    pub fn new(client: ChatClient, settings: &ServerConfig) -> Self {
        Self {
            config: Arc::clone(client.config_store()),
            client,
            limiter: RateLimiter::new(
                settings.max_requests_per_minute,
                Duration::from_secs(settings.window_seconds),
            ),
            started: Instant::now(),
        }
    }

    fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(status))
        .route("/api/chat", post(handle_chat))
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/config/test", post(test_config))
        .route("/api/config/reset", post(reset_config))
        .with_state(state)
}

/// Run the proxy until Ctrl-C
pub async fn run_server(state: Arc<AppState>, host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| ChatroomError::Config(format!("Invalid listen address: {}", e)))?;

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down HTTP server");
    })
    .await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = state.config.get();
    Json(json!({
        "status": "running",
        "api": config.api_provider,
        "model": config.model,
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": state.uptime_secs(),
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = state.config.public_config();
    Json(json!({
        "server": {
            "status": "running",
            "uptime": state.uptime_secs(),
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "api": {
            "provider": config.api_provider,
            "model": config.model,
            "baseURL": config.base_url,
            "hasApiKey": config.has_api_key,
            "isConfigured": config.is_configured,
            "rateLimits": {
                "maxRequestsPerMinute": state.limiter.max_requests(),
                "windowMs": state.limiter.window().as_millis() as u64,
            },
        },
    }))
}

fn client_address(connect: Option<&ConnectInfo<SocketAddr>>, headers: &HeaderMap) -> String {
    if let Some(ConnectInfo(addr)) = connect {
        return addr.ip().to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn too_many_requests(message: &str, retry_after_secs: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too many requests",
            "message": message,
            "retryAfter": retry_after_secs,
        })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client = client_address(connect.as_ref(), &headers);
    if let Err(retry_after) = state.limiter.check(&client) {
        tracing::info!(client = %client, retry_after, "Client over request limit");
        return too_many_requests(
            &format!(
                "At most {} requests are allowed per window; try again later",
                state.limiter.max_requests()
            ),
            retry_after,
        );
    }

    let request: ProxyChatRequest = serde_json::from_slice(&body).unwrap_or_default();
    let message = match request.message.as_deref().map(str::trim) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Message is required" })),
            )
                .into_response()
        }
    };

    let now = Utc::now();
    let history: Vec<ChatMessage> = request
        .history
        .iter()
        .map(|entry| ChatMessage::new(entry.kind, entry.content.clone(), now))
        .collect();
    let message_count = state.client.build_messages(&message, &history).len();

    match state.client.send_chat_request(&message, &history).await {
        Ok(reply) => {
            let config = state.config.get();
            tracing::info!(
                client = %client,
                attempts = reply.attempts,
                history = history.len(),
                "Proxied chat request"
            );
            (
                StatusCode::OK,
                Json(ProxyChatResponse {
                    response: reply.content,
                    meta: ProxyChatMeta {
                        model: config.model,
                        api: config.api_provider,
                        usage: reply.usage,
                        message_count,
                    },
                }),
            )
                .into_response()
        }
        Err(e) => chat_error_response(&e),
    }
}

fn chat_error_response(error: &anyhow::Error) -> Response {
    match error.downcast_ref::<ChatroomError>() {
        Some(ChatroomError::Config(message)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Configuration required",
                "message": message,
                "needsConfig": true,
            })),
        )
            .into_response(),
        Some(ChatroomError::RateLimit {
            retry_after,
            message,
        }) => {
            let secs = (retry_after.as_millis().div_ceil(1000) as u64).max(1);
            tracing::warn!(retry_after_secs = secs, "Upstream rate limit");
            too_many_requests(message, secs)
        }
        Some(err @ (ChatroomError::Http { .. } | ChatroomError::Network(_))) => {
            tracing::error!(error = %err, "Upstream chat request failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "Upstream request failed",
                    "message": err.to_string(),
                })),
            )
                .into_response()
        }
        _ => {
            tracing::error!(error = %error, "Chat request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Internal server error",
                    "message": error.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn get_config(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, Json(state.config.public_config())).into_response()
}

fn parse_update(body: &Bytes) -> std::result::Result<ApiConfigUpdate, Response> {
    if body.is_empty() {
        return Ok(ApiConfigUpdate::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Invalid request body: {}", e) })),
        )
            .into_response()
    })
}

async fn update_config(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let update = match parse_update(&body) {
        Ok(update) => update,
        Err(response) => return response,
    };

    match state.config.update(&update) {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "config": state.config.public_config(),
            })),
        )
            .into_response(),
        Err(e) => match e.downcast_ref::<ChatroomError>() {
            Some(ChatroomError::Validation(errors)) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Invalid configuration",
                    "errors": errors,
                })),
            )
                .into_response(),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response(),
        },
    }
}

/// Test the stored configuration, or the stored one with the body's
/// fields applied, without persisting anything
async fn test_config(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let update = match parse_update(&body) {
        Ok(update) => update,
        Err(response) => return response,
    };
    let candidate = update.apply_to(&state.config.get());
    let result = state.client.test_connection(&candidate).await;
    (StatusCode::OK, Json(result)).into_response()
}

async fn reset_config(State(state): State<Arc<AppState>>) -> Response {
    match state.config.reset() {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "config": state.config.public_config(),
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

//! Error types for chatroom
//!
//! This module defines the error taxonomy shared by the stores, the chat
//! request client, the thinking-state coordinator and the orchestrator,
//! using `thiserror` for ergonomic error handling.

use std::time::Duration;
use thiserror::Error;

/// Main error type for chatroom operations
///
/// The first five variants form the user-facing taxonomy: configuration
/// problems, validation failures, rate limiting, transport failures and
/// non-success HTTP responses. The remaining variants cover local state
/// and persistence.
#[derive(Error, Debug)]
pub enum ChatroomError {
    /// Missing or invalid credentials; never retried
    #[error("Configuration error: {0}")]
    Config(String),

    /// One or more configuration fields failed validation
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// HTTP 429 after the retry budget was exhausted
    #[error("Rate limit exceeded: {message} (retry after {}s)", .retry_after.as_secs())]
    RateLimit {
        /// How long the server asked the caller to wait
        retry_after: Duration,
        /// Server-provided or default explanation
        message: String,
    },

    /// Transport failure (connection refused, reset, DNS, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Any other non-success status code
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code
        status: u16,
        /// Server-provided error message
        message: String,
    },

    /// Another tab holds the global thinking lease
    #[error("Another tab is waiting for a reply; try again when it finishes")]
    AnotherTabBusy,

    /// The session already has an outstanding request in this tab
    #[error("Session {0} is still waiting for a reply")]
    SessionBusy(String),

    /// Outbound message was empty after trimming
    #[error("Message cannot be empty")]
    EmptyMessage,

    /// No session with the given id exists
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Persistence backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ChatroomError {
    /// Whether the chat request client may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Network(_))
    }

    /// Wait recommended by the server, if this is a rate-limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Short stable label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::RateLimit { .. } => "rate_limit",
            Self::Network(_) => "network",
            Self::Http { .. } => "http",
            Self::AnotherTabBusy => "another_tab_busy",
            Self::SessionBusy(_) => "session_busy",
            Self::EmptyMessage => "empty_message",
            Self::UnknownSession(_) => "unknown_session",
            Self::Storage(_) => "storage",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Yaml(_) => "yaml",
        }
    }
}

/// Result type alias for chatroom operations
///
/// Uses `anyhow::Error` so callers can attach context; code that needs to
/// branch on the failure kind downcasts to [`ChatroomError`].
pub type Result<T> = anyhow::Result<T>;

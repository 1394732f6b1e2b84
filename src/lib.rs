//! chatroom - multi-session chat client library
//!
//! This library provides the session and request coordination core of a
//! chat client for OpenAI-compatible APIs: persistent provider settings,
//! multi-session transcripts, a retrying request client, cross-window
//! thinking-state coordination and the orchestrator tying them together.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `storage`: Key-value persistence shared by every store (SQLite, memory)
//! - `api_config`: Provider configuration store and validation
//! - `session`: Session store and message model
//! - `client`: Chat-completion client with retry, backoff and streaming
//! - `coordinator`: Cross-window lease and per-session thinking state
//! - `chat`: Orchestrator and the view trait front-ends implement
//! - `server`: HTTP proxy exposing `/api/chat`
//! - `config`: Application configuration and validation
//! - `error`: Error types and result aliases
//! - `cli`, `commands`: Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use chatroom::{ChatOrchestrator, ChatClient, ConfigStore, NullView, SessionStore,
//!     SqliteStorage, ThinkingCoordinator};
//! use chatroom::coordinator::DEFAULT_LEASE_TTL;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage: Arc<dyn chatroom::storage::KeyValueStore> = Arc::new(SqliteStorage::new()?);
//!     let config = Arc::new(ConfigStore::load(Arc::clone(&storage))?);
//!     let sessions = Arc::new(SessionStore::load(Arc::clone(&storage))?);
//!     let coordinator = Arc::new(ThinkingCoordinator::new(storage, DEFAULT_LEASE_TTL));
//!     let client = Arc::new(ChatClient::new(Arc::clone(&config)));
//!
//!     let chat = ChatOrchestrator::new(config, sessions, client, coordinator, Arc::new(NullView));
//!     chat.send("Hello!").await?;
//!     Ok(())
//! }
//! ```

pub mod api_config;
pub mod chat;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod server;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use api_config::{ApiConfig, ApiConfigUpdate, ConfigStore};
pub use chat::{ChatOrchestrator, ChatView, InputState, NullView, RejectReason, SendOutcome};
pub use client::{ChatBackend, ChatClient, ChatReply, Endpoint, RetryPolicy};
pub use config::AppConfig;
pub use coordinator::{ThinkingCoordinator, ThinkingGuard};
pub use error::{ChatroomError, Result};
pub use session::{ChatMessage, MessageKind, Session, SessionStore};
pub use storage::{KeyValueStore, MemoryStorage, SqliteStorage};

#[cfg(test)]
pub mod test_utils;

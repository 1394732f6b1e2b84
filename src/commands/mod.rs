/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `chat`: Interactive chat and one-shot sends
- `sessions`: Session listing and maintenance
- `config`: Provider configuration
- `special_commands`: Slash commands understood by the interactive chat

Every handler works on an [`App`], which opens the storage once and wires
the stores and clients from the loaded [`AppConfig`].
*/

use crate::api_config::ConfigStore;
use crate::chat::{ChatOrchestrator, ChatView};
use crate::client::{ChatClient, Endpoint};
use crate::config::AppConfig;
use crate::coordinator::ThinkingCoordinator;
use crate::error::Result;
use crate::session::SessionStore;
use crate::storage::{KeyValueStore, SqliteStorage};
use std::sync::Arc;

pub mod chat;
pub mod config;
pub mod sessions;
pub mod special_commands;

/// Stores and settings shared by every command
pub struct App {
    settings: AppConfig,
    storage: Arc<dyn KeyValueStore>,
    config: Arc<ConfigStore>,
    sessions: Arc<SessionStore>,
}

impl App {
    /// Open the configured SQLite storage and load both stores
    pub fn open(settings: AppConfig) -> Result<Self> {
        let storage = match &settings.storage.path {
            Some(path) => SqliteStorage::new_with_path(path)?,
            None => SqliteStorage::new()?,
        };
        tracing::debug!("Using storage at {}", storage.path().display());
        Self::with_storage(settings, Arc::new(storage))
    }

    /// Load both stores from `storage`
    ///
    /// Values from the `provider` section (and its environment overrides)
    /// are applied over the stored provider configuration for this run.
    pub fn with_storage(settings: AppConfig, storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let config = ConfigStore::load(Arc::clone(&storage))?;
        config.seed(&settings.provider);
        let sessions = SessionStore::load(Arc::clone(&storage))?;

        Ok(Self {
            settings,
            storage,
            config: Arc::new(config),
            sessions: Arc::new(sessions),
        })
    }

    /// Application settings
    pub fn settings(&self) -> &AppConfig {
        &self.settings
    }

    /// Provider configuration store
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Session store
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Chat client for the configured endpoint
    pub fn client(&self) -> Result<ChatClient> {
        self.client_for(self.settings.client.endpoint()?)
    }

    /// Chat client that talks to the provider itself
    pub fn direct_client(&self) -> Result<ChatClient> {
        self.client_for(Endpoint::Direct)
    }

    fn client_for(&self, endpoint: Endpoint) -> Result<ChatClient> {
        let settings = &self.settings.client;
        ChatClient::new(Arc::clone(&self.config))
            .with_endpoint(endpoint)
            .with_policy(settings.retry_policy())
            .with_history_limit(settings.history_limit)
            .with_system_prompt(settings.system_prompt.clone())
            .with_timeout(settings.timeout())
    }

    /// Thinking-state coordinator for a new window
    pub fn coordinator(&self) -> Arc<ThinkingCoordinator> {
        Arc::new(ThinkingCoordinator::new(
            Arc::clone(&self.storage),
            self.settings.coordinator.lease_ttl(),
        ))
    }

    /// Orchestrator presenting to `view`
    pub fn orchestrator(&self, view: Arc<dyn ChatView>, streaming: bool) -> Result<ChatOrchestrator> {
        Ok(ChatOrchestrator::new(
            Arc::clone(&self.config),
            Arc::clone(&self.sessions),
            Arc::new(self.client()?),
            self.coordinator(),
            view,
        )
        .with_streaming(streaming))
    }
}

//! Test utilities for chatroom
//!
//! This module provides a recording [`ChatView`], a scripted
//! [`ChatBackend`] and small helpers for temporary storage and assertions.

use crate::api_config::{ApiConfigUpdate, ConfigStore};
use crate::chat::{ChatView, InputState};
use crate::client::{ChatBackend, ChatReply};
use crate::error::{ChatroomError, Result};
use crate::session::ChatMessage;
use crate::storage::{KeyValueStore, MemoryStorage, SqliteStorage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Create a temporary directory for testing
///
/// # Returns
///
/// Returns a TempDir that will be cleaned up when dropped
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Create SQLite storage inside a fresh temporary directory
///
/// Keep the returned directory alive for as long as the storage is used.
pub fn temp_sqlite() -> (SqliteStorage, TempDir) {
    let dir = temp_dir();
    let storage =
        SqliteStorage::new_with_path(dir.path().join("chatroom.db")).expect("Failed to open db");
    (storage, dir)
}

/// Shared in-memory storage
pub fn memory_store() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryStorage::new())
}

/// In-memory storage whose writes can be switched off
///
/// Reads keep working so a store loaded over it starts normally.
#[derive(Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    fail_writes: AtomicBool,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `set` and `remove` fail
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChatroomError::Storage("disk full".to_string()).into());
        }
        Ok(())
    }
}

impl KeyValueStore for FailingStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.remove(key)
    }
}

/// Config store with a complete provider configuration
pub fn configured_store(storage: Arc<dyn KeyValueStore>, base_url: &str) -> Arc<ConfigStore> {
    let store = ConfigStore::load(storage).expect("Failed to load config");
    store
        .update(&ApiConfigUpdate {
            api_key: Some("test-key".to_string()),
            base_url: Some(base_url.to_string()),
            model: Some("test-model".to_string()),
            ..Default::default()
        })
        .expect("Failed to configure store");
    Arc::new(store)
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T: std::fmt::Debug>(result: Result<T>, expected: &str) {
    match result {
        Ok(value) => panic!("Expected error containing '{}', got Ok({:?})", expected, value),
        Err(e) => {
            let message = e.to_string();
            assert!(
                message.contains(expected),
                "Error message '{}' does not contain '{}'",
                message,
                expected
            );
        }
    }
}

/// One call made on a [`RecordingView`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    UserMessage(String),
    AiMessage(String),
    Delta(String),
    ShowTyping,
    HideTyping,
    Error(String),
    Notice(String),
    Input(InputState),
    OpenSettings,
    RemoveLastAi,
}

/// View that records every call
#[derive(Debug, Default)]
pub struct RecordingView {
    events: Mutex<Vec<ViewEvent>>,
}

impl RecordingView {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ViewEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<ViewEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, event: &ViewEvent) -> bool {
        self.events.lock().unwrap().contains(event)
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ViewEvent::Error(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn ai_messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ViewEvent::AiMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn input_states(&self) -> Vec<InputState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ViewEvent::Input(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn last_input_state(&self) -> Option<InputState> {
        self.input_states().last().copied()
    }
}

impl ChatView for RecordingView {
    fn show_user_message(&self, message: &ChatMessage) {
        self.push(ViewEvent::UserMessage(message.content.clone()));
    }

    fn show_ai_message(&self, message: &ChatMessage) {
        self.push(ViewEvent::AiMessage(message.content.clone()));
    }

    fn show_ai_delta(&self, delta: &str) {
        self.push(ViewEvent::Delta(delta.to_string()));
    }

    fn show_typing(&self) {
        self.push(ViewEvent::ShowTyping);
    }

    fn hide_typing(&self) {
        self.push(ViewEvent::HideTyping);
    }

    fn show_error(&self, message: &str) {
        self.push(ViewEvent::Error(message.to_string()));
    }

    fn show_notice(&self, message: &str) {
        self.push(ViewEvent::Notice(message.to_string()));
    }

    fn set_input_state(&self, state: InputState) {
        self.push(ViewEvent::Input(state));
    }

    fn open_settings(&self) {
        self.push(ViewEvent::OpenSettings);
    }

    fn remove_last_ai_message(&self) {
        self.push(ViewEvent::RemoveLastAi);
    }
}

/// A request received by [`ScriptedBackend`]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub message: String,
    pub history: Vec<ChatMessage>,
}

enum Scripted {
    Reply(String),
    Error(ChatroomError),
    Gated(String, oneshot::Receiver<()>),
}

/// Backend answering from a queue of canned results
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, content: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Reply(content.to_string()));
    }

    pub fn push_error(&self, error: ChatroomError) {
        self.script.lock().unwrap().push_back(Scripted::Error(error));
    }

    /// Queue a reply that is held back until the returned sender fires
    pub fn push_gated_reply(&self, content: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Gated(content.to_string(), rx));
        tx
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until at least `n` requests have been received
    pub async fn wait_for_calls(&self, n: usize) {
        while self.calls.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send_chat_request(&self, message: &str, history: &[ChatMessage]) -> Result<ChatReply> {
        self.calls.lock().unwrap().push(RecordedCall {
            message: message.to_string(),
            history: history.to_vec(),
        });
        let next = self.script.lock().unwrap().pop_front();
        let content = match next {
            Some(Scripted::Reply(content)) => content,
            Some(Scripted::Error(error)) => return Err(error.into()),
            Some(Scripted::Gated(content, gate)) => {
                let _ = gate.await;
                content
            }
            None => return Err(ChatroomError::Network("no scripted reply".to_string()).into()),
        };
        Ok(ChatReply {
            content,
            usage: None,
            attempts: 1,
        })
    }
}

use chatroom::api_config::{ApiConfigUpdate, ConfigStore};
use chatroom::chat::{ChatView, InputState};
use chatroom::session::ChatMessage;
use chatroom::storage::{KeyValueStore, MemoryStorage, SqliteStorage};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[allow(dead_code)]
pub fn create_temp_storage() -> (SqliteStorage, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("chatroom.db");
    let storage =
        SqliteStorage::new_with_path(db_path).expect("failed to create sqlite storage with path");
    (storage, tmp)
}

#[allow(dead_code)]
pub fn memory_store() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryStorage::new())
}

/// Config store pointing at `base_url` with a complete configuration
#[allow(dead_code)]
pub fn configured_store(storage: Arc<dyn KeyValueStore>, base_url: &str) -> Arc<ConfigStore> {
    let store = ConfigStore::load(storage).expect("failed to load config store");
    store
        .update(&ApiConfigUpdate {
            api_key: Some("test-key".to_string()),
            base_url: Some(base_url.to_string()),
            model: Some("test-model".to_string()),
            ..Default::default()
        })
        .expect("failed to configure store");
    Arc::new(store)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("chatroom.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Chat completion body with one assistant message
#[allow(dead_code)]
pub fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5 }
    })
}

/// View that records what it was told to show
#[allow(dead_code)]
#[derive(Default)]
pub struct TestView {
    pub user_messages: Mutex<Vec<String>>,
    pub ai_messages: Mutex<Vec<String>>,
    pub deltas: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
    pub states: Mutex<Vec<InputState>>,
    pub settings_opened: Mutex<usize>,
}

#[allow(dead_code)]
impl TestView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ai_messages(&self) -> Vec<String> {
        self.ai_messages.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<InputState> {
        self.states.lock().unwrap().clone()
    }

    pub fn deltas(&self) -> Vec<String> {
        self.deltas.lock().unwrap().clone()
    }
}

impl ChatView for TestView {
    fn show_user_message(&self, message: &ChatMessage) {
        self.user_messages
            .lock()
            .unwrap()
            .push(message.content.clone());
    }

    fn show_ai_message(&self, message: &ChatMessage) {
        self.ai_messages.lock().unwrap().push(message.content.clone());
    }

    fn show_ai_delta(&self, delta: &str) {
        self.deltas.lock().unwrap().push(delta.to_string());
    }

    fn show_typing(&self) {}

    fn hide_typing(&self) {}

    fn show_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn set_input_state(&self, state: InputState) {
        self.states.lock().unwrap().push(state);
    }

    fn open_settings(&self) {
        *self.settings_opened.lock().unwrap() += 1;
    }

    fn remove_last_ai_message(&self) {
        self.ai_messages.lock().unwrap().pop();
    }
}

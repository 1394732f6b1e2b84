use serde::{Deserialize, Serialize};

/// Well-known storage keys
pub mod keys {
    /// Session collection, a JSON object keyed by session id
    pub const SESSIONS: &str = "chatroom-sessions";
    /// Id of the session currently displayed
    pub const CURRENT_SESSION: &str = "chatroom-current-session";
    /// Provider configuration record
    pub const CONFIG: &str = "chatroom-config";
    /// Global thinking lease shared by every window
    pub const THINKING_STATE: &str = "chatroom-thinking-state";
}

/// Size summary of a storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Number of stored keys
    pub keys: usize,
    /// Total bytes of stored values
    pub bytes: usize,
}

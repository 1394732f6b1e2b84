use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Title given to sessions until the first user message names them
pub const DEFAULT_SESSION_TITLE: &str = "New chat";

/// Characters kept from the first user message when deriving a title
pub const TITLE_MAX_CHARS: usize = 20;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Typed by the user
    User,
    /// Produced by the model
    Ai,
}

impl MessageKind {
    /// Role used on the chat-completions wire
    pub fn wire_role(self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Ai => "assistant",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::User => write!(f, "user"),
            MessageKind::Ai => write!(f, "ai"),
        }
    }
}

/// A single entry in a session transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message identifier
    pub id: String,
    /// Who wrote the message
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Message text
    pub content: String,
    /// When the message was appended
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message with a fresh id
    pub fn new(kind: MessageKind, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: new_message_id(),
            kind,
            content: content.into(),
            timestamp,
        }
    }

    /// Convenience constructor for a user message stamped now
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageKind::User, content, Utc::now())
    }

    /// Convenience constructor for an AI message stamped now
    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Ai, content, Utc::now())
    }
}

/// One independently addressable chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique session identifier
    pub id: String,
    /// Display title
    pub title: String,
    /// Ordered message log
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last mutation
    pub updated_at: DateTime<Utc>,
    /// Cached `messages.len()`
    #[serde(default)]
    pub message_count: usize,
}

impl Session {
    /// Create an empty session
    pub fn new(title: Option<String>, now: DateTime<Utc>) -> Self {
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string());
        Self {
            id: new_session_id(),
            title,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            message_count: 0,
        }
    }

    /// Bring the cached count back in line with the message log
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.message_count = self.messages.len();
        self.updated_at = now;
    }

    /// Whether the title is still the placeholder
    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_SESSION_TITLE
    }

    /// Most recent user message, if any
    pub fn last_user_message(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.kind == MessageKind::User)
    }

    /// Last message, if any
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

/// Change notifications published by the session store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was created
    Created(String),
    /// The current pointer moved
    Switched(String),
    /// Messages of a session changed
    Updated(String),
    /// A session got a new title
    Renamed(String),
    /// A session's messages were removed
    Cleared(String),
    /// A session was deleted
    Deleted(String),
    /// Every session was removed or replaced
    Reset,
}

/// Document produced by session export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExport {
    /// Sessions keyed by id
    pub sessions: std::collections::HashMap<String, Session>,
    /// Pointer at export time
    #[serde(default)]
    pub current_session_id: Option<String>,
    /// When the export was taken
    #[serde(default)]
    pub export_time: Option<DateTime<Utc>>,
}

/// Derive a session title from the first user message
///
/// Content longer than [`TITLE_MAX_CHARS`] characters is truncated and
/// suffixed with `...`. Blank content falls back to a dated title.
///
/// # Examples
///
/// ```
/// use chatroom::session::title_from_message;
///
/// assert_eq!(title_from_message("hello"), "hello");
/// assert_eq!(
///     title_from_message("a message that is definitely too long"),
///     "a message that is de..."
/// );
/// ```
pub fn title_from_message(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return format!("Chat {}", Utc::now().format("%Y-%m-%d"));
    }
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}

/// Generate a new session id
pub fn new_session_id() -> String {
    format!("session_{}", Ulid::new().to_string().to_lowercase())
}

/// Generate a new message id
pub fn new_message_id() -> String {
    format!("msg_{}", Ulid::new().to_string().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_type_field() {
        let msg = ChatMessage::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "user");
        assert_eq!(json["content"], "hi");
        assert!(json["id"].as_str().unwrap().starts_with("msg_"));
    }

    #[test]
    fn test_session_uses_camel_case() {
        let session = Session::new(None, Utc::now());
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("messageCount").is_some());
        assert_eq!(json["title"], DEFAULT_SESSION_TITLE);
    }

    #[test]
    fn test_blank_title_falls_back_to_default() {
        let session = Session::new(Some("   ".to_string()), Utc::now());
        assert!(session.has_default_title());
    }

    #[test]
    fn test_title_truncates_on_char_boundary() {
        let text = "你好".repeat(15);
        let title = title_from_message(&text);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_title_exactly_at_limit_is_kept() {
        let text = "x".repeat(TITLE_MAX_CHARS);
        assert_eq!(title_from_message(&text), text);
    }

    #[test]
    fn test_last_user_message_skips_ai() {
        let mut session = Session::new(None, Utc::now());
        session.messages.push(ChatMessage::user("q1"));
        session.messages.push(ChatMessage::ai("a1"));
        assert_eq!(session.last_user_message().unwrap().content, "q1");
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
        assert_ne!(new_message_id(), new_message_id());
    }
}

//! Multi-session chat history
//!
//! The [`SessionStore`] owns every session and the "current session"
//! pointer. Each mutation is applied to a copy of the whole collection,
//! saved to the key-value backend, and only then made visible in memory,
//! so a failed save leaves the store as it was. Successful changes end in a
//! [`SessionEvent`] broadcast so front-ends can refresh without the store
//! knowing about them.

use crate::error::{ChatroomError, Result};
use crate::storage::{keys, load_json, save_json, KeyValueStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

pub mod types;

pub use types::{
    title_from_message, ChatMessage, MessageKind, Session, SessionEvent, SessionExport,
    DEFAULT_SESSION_TITLE,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default, Clone)]
struct SessionState {
    sessions: HashMap<String, Session>,
    current_id: Option<String>,
    last_stamp: Option<DateTime<Utc>>,
}

impl SessionState {
    fn from_sessions(mut sessions: HashMap<String, Session>, pointer: Option<String>) -> Self {
        for (id, session) in sessions.iter_mut() {
            // Imported or hand-edited records may disagree with their key.
            session.id = id.clone();
            session.message_count = session.messages.len();
        }
        let last_stamp = sessions.values().map(|s| s.updated_at).max();
        let mut state = Self {
            sessions,
            current_id: None,
            last_stamp,
        };
        state.current_id = match pointer {
            Some(id) if state.sessions.contains_key(&id) => Some(id),
            _ => state.most_recent_id(),
        };
        state
    }

    /// Next mutation timestamp, strictly after every previous one
    fn stamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_stamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_stamp = Some(now);
        now
    }

    fn sorted(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self.sessions.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    fn most_recent_id(&self) -> Option<String> {
        self.sessions
            .values()
            .max_by_key(|s| s.updated_at)
            .map(|s| s.id.clone())
    }

    fn insert_new(&mut self, title: Option<String>) -> Session {
        let now = self.stamp();
        let session = Session::new(title, now);
        self.sessions.insert(session.id.clone(), session.clone());
        self.current_id = Some(session.id.clone());
        session
    }

    fn valid_current_id(&self) -> Option<&String> {
        self.current_id
            .as_ref()
            .filter(|id| self.sessions.contains_key(*id))
    }
}

/// Persisted collection of chat sessions
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
    state: RwLock<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    /// Load sessions from storage
    ///
    /// The stored pointer is used when it names an existing session,
    /// otherwise the most recently updated one. An empty store gets one
    /// fresh session.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let sessions: HashMap<String, Session> =
            load_json(storage.as_ref(), keys::SESSIONS)?.unwrap_or_default();
        let pointer = storage
            .get(keys::CURRENT_SESSION)?
            .filter(|id| !id.is_empty());

        let state = SessionState::from_sessions(sessions, pointer);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Self {
            storage,
            state: RwLock::new(state),
            events,
        };

        {
            let mut state = store.write_state()?;
            if state.sessions.is_empty() {
                let session = state.insert_new(None);
                store.persist(&state)?;
                tracing::info!(session_id = %session.id, "Created initial session");
            }
            tracing::debug!(sessions = state.sessions.len(), "Loaded sessions");
        }

        Ok(store)
    }

    /// Register for change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, SessionState>> {
        self.state
            .read()
            .map_err(|_| ChatroomError::Storage("Session lock poisoned".into()).into())
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, SessionState>> {
        self.state
            .write()
            .map_err(|_| ChatroomError::Storage("Session lock poisoned".into()).into())
    }

    fn persist(&self, state: &SessionState) -> Result<()> {
        save_json(self.storage.as_ref(), keys::SESSIONS, &state.sessions)?;
        self.persist_pointer(state)
    }

    fn persist_pointer(&self, state: &SessionState) -> Result<()> {
        self.storage.set(
            keys::CURRENT_SESSION,
            state.current_id.as_deref().unwrap_or(""),
        )
    }

    /// Create a session and make it current
    pub fn create_session(&self, title: Option<String>) -> Result<Session> {
        let session = {
            let mut live = self.write_state()?;
            let mut state = live.clone();
            let session = state.insert_new(title);
            self.persist(&state)?;
            *live = state;
            session
        };
        tracing::info!(session_id = %session.id, title = %session.title, "Created session");
        self.emit(SessionEvent::Created(session.id.clone()));
        Ok(session)
    }

    /// Make `id` the current session
    ///
    /// Returns `None` without side effects when the id is unknown. Only the
    /// pointer is persisted.
    pub fn switch_to_session(&self, id: &str) -> Result<Option<Session>> {
        let session = {
            let mut live = self.write_state()?;
            let mut state = live.clone();
            let Some(session) = state.sessions.get(id).cloned() else {
                return Ok(None);
            };
            state.current_id = Some(id.to_string());
            self.persist_pointer(&state)?;
            *live = state;
            session
        };
        tracing::debug!(session_id = %id, "Switched session");
        self.emit(SessionEvent::Switched(id.to_string()));
        Ok(Some(session))
    }

    /// The current session, created on demand when the pointer is invalid
    pub fn get_current_session(&self) -> Result<Session> {
        {
            let state = self.read_state()?;
            if let Some(id) = state.valid_current_id() {
                if let Some(session) = state.sessions.get(id) {
                    return Ok(session.clone());
                }
            }
        }
        self.create_session(None)
    }

    /// Id of the current session, if the pointer is valid
    pub fn current_session_id(&self) -> Option<String> {
        self.read_state()
            .ok()
            .and_then(|s| s.valid_current_id().cloned())
    }

    /// Look up a session by id
    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.read_state()
            .ok()
            .and_then(|s| s.sessions.get(id).cloned())
    }

    /// Every session, most recently updated first
    pub fn get_all_sessions(&self) -> Vec<Session> {
        self.read_state().map(|s| s.sorted()).unwrap_or_default()
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.read_state().map(|s| s.sessions.len()).unwrap_or(0)
    }

    /// Whether there are no sessions (only after `clear_all_data`)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a message to the current session
    pub fn add_message(
        &self,
        kind: MessageKind,
        content: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<ChatMessage> {
        let session = self.get_current_session()?;
        self.add_message_to(&session.id, kind, content, timestamp)
    }

    /// Append a message to a specific session
    ///
    /// The first user message of a session that still carries the default
    /// title renames it after the message content.
    pub fn add_message_to(
        &self,
        session_id: &str,
        kind: MessageKind,
        content: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<ChatMessage> {
        let message = {
            let mut live = self.write_state()?;
            let mut state = live.clone();
            let now = state.stamp();
            let session = state
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| ChatroomError::UnknownSession(session_id.to_string()))?;

            let first_user_message =
                kind == MessageKind::User && session.last_user_message().is_none();
            let message = ChatMessage::new(kind, content, timestamp.unwrap_or(now));
            session.messages.push(message.clone());
            session.touch(now);

            if first_user_message && session.has_default_title() {
                session.title = title_from_message(content);
            }

            self.persist(&state)?;
            *live = state;
            message
        };
        tracing::debug!(session_id, kind = %kind, "Added message");
        self.emit(SessionEvent::Updated(session_id.to_string()));
        Ok(message)
    }

    /// Pop the last message of the current session
    pub fn remove_last_message(&self) -> Result<Option<ChatMessage>> {
        let Some(id) = self.current_session_id() else {
            return Ok(None);
        };
        self.remove_last_message_from(&id)
    }

    /// Pop the last message of a specific session
    ///
    /// A no-op returning `None` when the session is empty or unknown.
    pub fn remove_last_message_from(&self, session_id: &str) -> Result<Option<ChatMessage>> {
        let removed = {
            let mut live = self.write_state()?;
            let mut state = live.clone();
            let now = state.stamp();
            let Some(session) = state.sessions.get_mut(session_id) else {
                return Ok(None);
            };
            let Some(removed) = session.messages.pop() else {
                return Ok(None);
            };
            session.touch(now);
            self.persist(&state)?;
            *live = state;
            removed
        };
        self.emit(SessionEvent::Updated(session_id.to_string()));
        Ok(Some(removed))
    }

    /// Replace the content of a user message in the current session
    ///
    /// Later messages are kept. Returns false for unknown ids and for AI
    /// messages.
    pub fn edit_message(&self, message_id: &str, content: &str) -> Result<bool> {
        let Some(session_id) = self.current_session_id() else {
            return Ok(false);
        };
        {
            let mut live = self.write_state()?;
            let mut state = live.clone();
            let now = state.stamp();
            let Some(session) = state.sessions.get_mut(&session_id) else {
                return Ok(false);
            };
            let Some(message) = session
                .messages
                .iter_mut()
                .find(|m| m.id == message_id && m.kind == MessageKind::User)
            else {
                return Ok(false);
            };
            message.content = content.to_string();
            session.touch(now);
            self.persist(&state)?;
            *live = state;
        }
        self.emit(SessionEvent::Updated(session_id));
        Ok(true)
    }

    /// Give a session a new title
    pub fn rename_session(&self, id: &str, title: &str) -> Result<bool> {
        {
            let mut live = self.write_state()?;
            let mut state = live.clone();
            let now = state.stamp();
            let Some(session) = state.sessions.get_mut(id) else {
                return Ok(false);
            };
            session.title = title.trim().to_string();
            session.touch(now);
            self.persist(&state)?;
            *live = state;
        }
        self.emit(SessionEvent::Renamed(id.to_string()));
        Ok(true)
    }

    /// Remove every message of a session
    pub fn clear_session(&self, id: &str) -> Result<bool> {
        {
            let mut live = self.write_state()?;
            let mut state = live.clone();
            let now = state.stamp();
            let Some(session) = state.sessions.get_mut(id) else {
                return Ok(false);
            };
            session.messages.clear();
            session.touch(now);
            self.persist(&state)?;
            *live = state;
        }
        self.emit(SessionEvent::Cleared(id.to_string()));
        Ok(true)
    }

    /// Delete a session
    ///
    /// Deleting the current session moves the pointer to the most recently
    /// updated remaining session, or to a fresh one when none remain.
    pub fn delete_session(&self, id: &str) -> Result<bool> {
        let created = {
            let mut live = self.write_state()?;
            let mut state = live.clone();
            if state.sessions.remove(id).is_none() {
                return Ok(false);
            }

            let mut created = None;
            if state.current_id.as_deref() == Some(id) {
                state.current_id = state.most_recent_id();
                if state.current_id.is_none() {
                    created = Some(state.insert_new(None));
                }
            }
            self.persist(&state)?;
            *live = state;
            created
        };

        tracing::info!(session_id = %id, "Deleted session");
        self.emit(SessionEvent::Deleted(id.to_string()));
        if let Some(session) = created {
            self.emit(SessionEvent::Created(session.id));
        }
        Ok(true)
    }

    /// Remove every session and the pointer from storage
    ///
    /// The next [`get_current_session`](Self::get_current_session) call
    /// creates a fresh session.
    pub fn clear_all_data(&self) -> Result<()> {
        {
            let mut state = self.write_state()?;
            self.storage.remove(keys::SESSIONS)?;
            self.storage.remove(keys::CURRENT_SESSION)?;
            state.sessions.clear();
            state.current_id = None;
        }
        tracing::info!("Cleared all session data");
        self.emit(SessionEvent::Reset);
        Ok(())
    }

    /// Export every session as pretty JSON
    pub fn export_sessions(&self) -> Result<String> {
        let state = self.read_state()?;
        let export = SessionExport {
            sessions: state.sessions.clone(),
            current_session_id: state.current_id.clone(),
            export_time: Some(Utc::now()),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Replace all sessions with an exported document
    ///
    /// Returns the number of imported sessions. A malformed document leaves
    /// the store untouched.
    pub fn import_sessions(&self, json: &str) -> Result<usize> {
        let export: SessionExport = serde_json::from_str(json)?;
        let count = export.sessions.len();
        {
            let mut live = self.write_state()?;
            let mut state =
                SessionState::from_sessions(export.sessions, export.current_session_id);
            state.last_stamp = state.last_stamp.max(live.last_stamp);
            if state.sessions.is_empty() {
                state.insert_new(None);
            }
            self.persist(&state)?;
            *live = state;
        }
        tracing::info!(count, "Imported sessions");
        self.emit(SessionEvent::Reset);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::test_utils::FailingStorage;

    fn store() -> (SessionStore, MemoryStorage) {
        let storage = MemoryStorage::new();
        let store = SessionStore::load(Arc::new(storage.clone())).unwrap();
        (store, storage)
    }

    fn assert_counts_consistent(store: &SessionStore) {
        for session in store.get_all_sessions() {
            assert_eq!(session.message_count, session.messages.len());
        }
    }

    fn assert_sorted(store: &SessionStore) {
        let all = store.get_all_sessions();
        for pair in all.windows(2) {
            assert!(pair[0].updated_at >= pair[1].updated_at);
        }
    }

    #[test]
    fn test_empty_store_creates_initial_session() {
        let (store, storage) = store();
        assert_eq!(store.len(), 1);
        let current = store.get_current_session().unwrap();
        assert_eq!(current.title, DEFAULT_SESSION_TITLE);
        assert_eq!(
            storage.get(keys::CURRENT_SESSION).unwrap().as_deref(),
            Some(current.id.as_str())
        );
    }

    #[test]
    fn test_add_message_keeps_count_and_auto_titles() {
        let (store, _) = store();
        store
            .add_message(MessageKind::User, "What is the weather like today?", None)
            .unwrap();
        store.add_message(MessageKind::Ai, "Sunny", None).unwrap();
        store
            .add_message(MessageKind::User, "And tomorrow?", None)
            .unwrap();

        let session = store.get_current_session().unwrap();
        assert_eq!(session.message_count, 3);
        assert_eq!(session.title, "What is the weather ...");
        assert_counts_consistent(&store);
    }

    #[test]
    fn test_auto_title_skips_renamed_sessions() {
        let (store, _) = store();
        let session = store.create_session(Some("Work".to_string())).unwrap();
        store.add_message(MessageKind::User, "hello", None).unwrap();
        assert_eq!(store.get_session(&session.id).unwrap().title, "Work");
    }

    #[test]
    fn test_ai_message_first_does_not_title() {
        let (store, _) = store();
        store.add_message(MessageKind::Ai, "Welcome", None).unwrap();
        assert!(store.get_current_session().unwrap().has_default_title());
        store.add_message(MessageKind::User, "hi", None).unwrap();
        assert_eq!(store.get_current_session().unwrap().title, "hi");
    }

    #[test]
    fn test_mutations_move_session_to_front() {
        let (store, _) = store();
        let first = store.get_current_session().unwrap();
        let second = store.create_session(None).unwrap();
        assert_eq!(store.get_all_sessions()[0].id, second.id);

        store
            .add_message_to(&first.id, MessageKind::User, "bump", None)
            .unwrap();
        assert_eq!(store.get_all_sessions()[0].id, first.id);
        assert_sorted(&store);

        store.rename_session(&second.id, "renamed").unwrap();
        assert_eq!(store.get_all_sessions()[0].id, second.id);
        assert_sorted(&store);
    }

    #[test]
    fn test_switch_unknown_is_noop() {
        let (store, _) = store();
        let current = store.current_session_id();
        assert!(store.switch_to_session("missing").unwrap().is_none());
        assert_eq!(store.current_session_id(), current);
    }

    #[test]
    fn test_switch_persists_pointer_only() {
        let (store, storage) = store();
        let first = store.get_current_session().unwrap();
        store.create_session(None).unwrap();
        let before = storage.get(keys::SESSIONS).unwrap();

        store.switch_to_session(&first.id).unwrap().unwrap();
        assert_eq!(storage.get(keys::SESSIONS).unwrap(), before);
        assert_eq!(
            storage.get(keys::CURRENT_SESSION).unwrap().as_deref(),
            Some(first.id.as_str())
        );
    }

    #[test]
    fn test_remove_last_message() {
        let (store, _) = store();
        assert!(store.remove_last_message().unwrap().is_none());
        store.add_message(MessageKind::User, "q", None).unwrap();
        store.add_message(MessageKind::Ai, "a", None).unwrap();
        let removed = store.remove_last_message().unwrap().unwrap();
        assert_eq!(removed.content, "a");
        assert_eq!(store.get_current_session().unwrap().message_count, 1);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (store, _) = store();
        let id = store.current_session_id().unwrap();
        store.add_message(MessageKind::User, "q", None).unwrap();
        assert!(store.clear_session(&id).unwrap());
        let once = store.get_session(&id).unwrap();
        assert!(store.clear_session(&id).unwrap());
        let twice = store.get_session(&id).unwrap();
        assert_eq!(once.messages, twice.messages);
        assert_eq!(twice.message_count, 0);
        assert!(!store.clear_session("missing").unwrap());
    }

    #[test]
    fn test_delete_current_selects_most_recent() {
        let (store, _) = store();
        let a = store.get_current_session().unwrap();
        let b = store.create_session(None).unwrap();
        let c = store.create_session(None).unwrap();
        store
            .add_message_to(&a.id, MessageKind::User, "latest", None)
            .unwrap();
        store.switch_to_session(&c.id).unwrap();

        assert!(store.delete_session(&c.id).unwrap());
        assert_eq!(store.current_session_id(), Some(a.id.clone()));
        assert!(store.get_session(&b.id).is_some());
    }

    #[test]
    fn test_delete_last_session_creates_fresh_one() {
        let (store, _) = store();
        let only = store.get_current_session().unwrap();
        assert!(store.delete_session(&only.id).unwrap());
        let current = store.get_current_session().unwrap();
        assert_ne!(current.id, only.id);
        assert_eq!(store.len(), 1);
        assert!(!store.delete_session(&only.id).unwrap());
    }

    #[test]
    fn test_delete_other_session_keeps_pointer() {
        let (store, _) = store();
        let a = store.get_current_session().unwrap();
        let b = store.create_session(None).unwrap();
        assert!(store.delete_session(&a.id).unwrap());
        assert_eq!(store.current_session_id(), Some(b.id));
    }

    #[test]
    fn test_edit_message_only_user() {
        let (store, _) = store();
        let user = store.add_message(MessageKind::User, "typo", None).unwrap();
        let ai = store.add_message(MessageKind::Ai, "reply", None).unwrap();

        assert!(store.edit_message(&user.id, "fixed").unwrap());
        assert!(!store.edit_message(&ai.id, "nope").unwrap());
        assert!(!store.edit_message("missing", "nope").unwrap());

        let session = store.get_current_session().unwrap();
        assert_eq!(session.messages[0].content, "fixed");
        assert_eq!(session.messages[1].content, "reply");
        assert_eq!(session.message_count, 2);
    }

    #[test]
    fn test_reload_restores_pointer() {
        let (store, storage) = store();
        let first = store.get_current_session().unwrap();
        store.create_session(None).unwrap();
        store.switch_to_session(&first.id).unwrap();

        let reloaded = SessionStore::load(Arc::new(storage)).unwrap();
        assert_eq!(reloaded.current_session_id(), Some(first.id));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_invalid_pointer_falls_back_to_most_recent() {
        let (store, storage) = store();
        store.create_session(None).unwrap();
        let newest = store.create_session(None).unwrap();
        storage.set(keys::CURRENT_SESSION, "session_gone").unwrap();

        let reloaded = SessionStore::load(Arc::new(storage)).unwrap();
        assert_eq!(reloaded.current_session_id(), Some(newest.id));
    }

    #[test]
    fn test_clear_all_then_lazy_create() {
        let (store, storage) = store();
        store.add_message(MessageKind::User, "q", None).unwrap();
        store.clear_all_data().unwrap();
        assert!(store.is_empty());
        assert!(storage.get(keys::SESSIONS).unwrap().is_none());

        let fresh = store.get_current_session().unwrap();
        assert_eq!(fresh.message_count, 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_export_import_roundtrip() {
        let (source, _) = store();
        source
            .add_message(MessageKind::User, "keep me", None)
            .unwrap();
        let current = source.current_session_id();
        let exported = source.export_sessions().unwrap();

        let (other, _) = store();
        assert_eq!(other.import_sessions(&exported).unwrap(), 1);
        assert_eq!(other.current_session_id(), current);
        assert_eq!(
            other.get_current_session().unwrap().messages[0].content,
            "keep me"
        );
    }

    #[test]
    fn test_import_rejects_garbage() {
        let (store, _) = store();
        let before = store.get_all_sessions();
        assert!(store.import_sessions("not json").is_err());
        assert_eq!(store.get_all_sessions(), before);
    }

    #[test]
    fn test_events_are_published() {
        let (store, _) = store();
        let mut rx = store.subscribe();
        let session = store.create_session(None).unwrap();
        store.add_message(MessageKind::User, "x", None).unwrap();
        store.rename_session(&session.id, "t").unwrap();

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Created(session.id.clone()));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Updated(session.id.clone()));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Renamed(session.id));
    }

    #[test]
    fn test_failed_save_leaves_memory_unchanged() {
        let storage = Arc::new(FailingStorage::new());
        let store = SessionStore::load(storage.clone()).unwrap();
        store.add_message(MessageKind::User, "first", None).unwrap();
        let before = store.get_current_session().unwrap();

        storage.fail_writes();
        let err = store
            .add_message(MessageKind::Ai, "lost", None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatroomError>(),
            Some(ChatroomError::Storage(_))
        ));
        assert!(store.rename_session(&before.id, "renamed").is_err());
        assert!(store.delete_session(&before.id).is_err());

        let after = store.get_current_session().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.message_count, 1);
        assert_eq!(store.len(), 1);
        assert_counts_consistent(&store);
    }

    #[test]
    fn test_add_message_to_unknown_session_fails() {
        let (store, _) = store();
        let err = store
            .add_message_to("missing", MessageKind::Ai, "x", None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatroomError>(),
            Some(ChatroomError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_rapid_mutations_have_distinct_timestamps() {
        let (store, _) = store();
        let mut last = store.get_current_session().unwrap().updated_at;
        for i in 0..50 {
            store
                .add_message(MessageKind::User, &format!("m{}", i), None)
                .unwrap();
            let now = store.get_current_session().unwrap().updated_at;
            assert!(now > last);
            last = now;
        }
    }
}

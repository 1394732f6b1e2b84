//! Thinking-state coordination
//!
//! Tracks whether a chat request is outstanding at two levels:
//!
//! - globally, across every window sharing the same storage, through a
//!   [`Lease`] on the thinking-state record
//! - per session, in a set local to this window
//!
//! A window may only start a request when no other window holds a live
//! lease and the target session has nothing outstanding here. Several
//! sessions of the same window may be in flight at once; the global lease
//! is released when the last of them finishes.

use crate::error::{ChatroomError, Result};
use crate::storage::{keys, KeyValueStore};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ulid::Ulid;

pub mod lease;

pub use lease::{Lease, LeaseRecord, DEFAULT_LEASE_TTL};

/// Snapshot of the coordinator's view, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStats {
    /// This window's id
    pub tab_id: String,
    /// Whether any window holds the global lease
    pub is_any_tab_thinking: bool,
    /// Whether this window holds the global lease
    pub is_current_tab_thinking: bool,
    /// Sessions with an outstanding request from this window
    pub thinking_sessions: Vec<String>,
    /// Whether anything is outstanding anywhere
    pub is_busy: bool,
}

/// Per-window thinking-state tracker
pub struct ThinkingCoordinator {
    tab_id: String,
    lease: Lease,
    sessions: Mutex<HashSet<String>>,
}

impl ThinkingCoordinator {
    /// Create a coordinator for a new window
    pub fn new(storage: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self::with_tab_id(storage, ttl, new_tab_id())
    }

    /// Create a coordinator with a fixed window id
    pub fn with_tab_id(storage: Arc<dyn KeyValueStore>, ttl: Duration, tab_id: String) -> Self {
        tracing::debug!(tab_id = %tab_id, ttl_secs = ttl.as_secs(), "Created thinking coordinator");
        Self {
            tab_id,
            lease: Lease::new(storage, keys::THINKING_STATE, ttl),
            sessions: Mutex::new(HashSet::new()),
        }
    }

    /// This window's id
    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    fn lock_sessions(&self) -> Result<std::sync::MutexGuard<'_, HashSet<String>>> {
        self.sessions
            .lock()
            .map_err(|_| ChatroomError::Storage("Thinking state lock poisoned".into()).into())
    }

    /// Check whether a request for `session_id` may start, without claiming
    pub fn check_available(&self, session_id: &str) -> Result<()> {
        if let Some(holder) = self.lease.holder()? {
            if holder.tab_id != self.tab_id {
                return Err(ChatroomError::AnotherTabBusy.into());
            }
        }
        if self.lock_sessions()?.contains(session_id) {
            return Err(ChatroomError::SessionBusy(session_id.to_string()).into());
        }
        Ok(())
    }

    /// Mark a request for `session_id` as started
    ///
    /// Claims the global lease for this window and records the session as
    /// thinking. Fails with [`ChatroomError::AnotherTabBusy`] when a
    /// different window holds a live lease, and with
    /// [`ChatroomError::SessionBusy`] when the session already has a
    /// request outstanding here. The returned guard finishes the request
    /// when dropped.
    pub fn begin(self: &Arc<Self>, session_id: &str) -> Result<ThinkingGuard> {
        let mut sessions = self.lock_sessions()?;
        if sessions.contains(session_id) {
            return Err(ChatroomError::SessionBusy(session_id.to_string()).into());
        }
        if !self.lease.acquire(&self.tab_id)? {
            tracing::info!(tab_id = %self.tab_id, session_id, "Another window is thinking");
            return Err(ChatroomError::AnotherTabBusy.into());
        }
        sessions.insert(session_id.to_string());
        tracing::debug!(tab_id = %self.tab_id, session_id, in_flight = sessions.len(), "Thinking started");

        Ok(ThinkingGuard {
            coordinator: Arc::clone(self),
            session_id: session_id.to_string(),
            finished: false,
        })
    }

    /// Mark a request for `session_id` as finished
    ///
    /// The global lease is released once no session of this window is
    /// still thinking.
    pub fn finish(&self, session_id: &str) {
        let remaining = match self.sessions.lock() {
            Ok(mut sessions) => {
                sessions.remove(session_id);
                sessions.len()
            }
            Err(_) => {
                tracing::error!(session_id, "Thinking state lock poisoned");
                return;
            }
        };
        tracing::debug!(tab_id = %self.tab_id, session_id, remaining, "Thinking finished");
        if remaining == 0 {
            self.release_lease();
        }
    }

    fn release_lease(&self) {
        if let Err(e) = self.lease.release(&self.tab_id) {
            tracing::warn!(error = %e, "Failed to release thinking lease");
        }
    }

    /// Whether any window holds a live lease (reclaims expired ones)
    pub fn is_any_tab_thinking(&self) -> bool {
        self.lease.is_held().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read thinking state");
            false
        })
    }

    /// Whether this window holds the lease
    pub fn is_current_tab_thinking(&self) -> bool {
        self.lease.is_held_by(&self.tab_id).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read thinking state");
            false
        })
    }

    /// Whether `session_id` has a request outstanding from this window
    pub fn is_session_thinking(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .map(|s| s.contains(session_id))
            .unwrap_or(false)
    }

    /// Sessions with a request outstanding from this window, sorted
    pub fn thinking_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .lock()
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Whether anything is outstanding in any window
    pub fn is_busy(&self) -> bool {
        self.is_any_tab_thinking() || !self.thinking_sessions().is_empty()
    }

    /// The window went to the background
    ///
    /// Releases the global lease if this window holds it. Per-session
    /// tracking is untouched.
    pub fn on_visibility_hidden(&self) {
        if self.is_current_tab_thinking() {
            tracing::debug!(tab_id = %self.tab_id, "Releasing lease on visibility change");
            self.release_lease();
        }
    }

    /// The window is closing; release the global lease if held
    pub fn teardown(&self) {
        self.release_lease();
    }

    /// Release the lease and forget every outstanding session
    pub fn reset(&self) {
        self.release_lease();
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.clear();
        }
    }

    /// Diagnostic snapshot
    pub fn stats(&self) -> CoordinatorStats {
        let thinking_sessions = self.thinking_sessions();
        let is_any_tab_thinking = self.is_any_tab_thinking();
        CoordinatorStats {
            tab_id: self.tab_id.clone(),
            is_any_tab_thinking,
            is_current_tab_thinking: self.is_current_tab_thinking(),
            is_busy: is_any_tab_thinking || !thinking_sessions.is_empty(),
            thinking_sessions,
        }
    }
}

/// Outstanding request marker; finishing happens on drop
#[must_use = "dropping the guard immediately ends the thinking state"]
pub struct ThinkingGuard {
    coordinator: Arc<ThinkingCoordinator>,
    session_id: String,
    finished: bool,
}

impl ThinkingGuard {
    /// Session this guard tracks
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Finish explicitly
    pub fn finish(mut self) {
        self.finish_once();
    }

    fn finish_once(&mut self) {
        if !self.finished {
            self.finished = true;
            self.coordinator.finish(&self.session_id);
        }
    }
}

impl Drop for ThinkingGuard {
    fn drop(&mut self) {
        self.finish_once();
    }
}

impl std::fmt::Debug for ThinkingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThinkingGuard")
            .field("tab_id", &self.coordinator.tab_id)
            .field("session_id", &self.session_id)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Generate a window id
pub fn new_tab_id() -> String {
    format!("tab_{}", Ulid::new().to_string().to_lowercase())
}

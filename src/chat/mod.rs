//! Chat orchestration
//!
//! [`ChatOrchestrator`] ties the stores, the request backend and the
//! thinking-state coordinator together for one window. A send captures
//! the id of the session it started in; the reply is always written to
//! that session, while the view is only touched if the session is still
//! the one displayed when the reply arrives.

use crate::api_config::ConfigStore;
use crate::client::{ChatBackend, ChatReply};
use crate::coordinator::{ThinkingCoordinator, ThinkingGuard};
use crate::error::{ChatroomError, Result};
use crate::session::{ChatMessage, MessageKind, Session, SessionStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub mod view;

pub use view::{ChatView, InputState, NullView};

const NOT_CONFIGURED_MESSAGE: &str =
    "The chat is not configured yet. Add an API key, base URL and model in the settings.";
const ANOTHER_TAB_MESSAGE: &str =
    "Another window is waiting for a reply. Please wait for it to finish.";
const SESSION_BUSY_MESSAGE: &str = "This session is still waiting for a reply.";

/// Why a send was refused before any request was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Nothing but whitespace was entered
    EmptyMessage,
    /// The provider configuration is incomplete
    NotConfigured,
    /// Another window holds the thinking lease
    AnotherTabBusy,
    /// The session already has a request outstanding
    SessionBusy,
    /// The rate-limit countdown is still running
    CoolingDown,
    /// Regenerate found no user message
    NothingToRegenerate,
}

/// Result of a send or regenerate
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The assistant answered
    Replied {
        /// Session the request was issued from
        session_id: String,
        /// The reply
        reply: ChatReply,
    },
    /// The request was issued and failed
    Failed {
        /// Session the request was issued from
        session_id: String,
        /// Error kind label
        kind: &'static str,
        /// Error text
        message: String,
        /// Wait advised by the server for rate limits
        retry_after: Option<Duration>,
    },
    /// No request was issued
    Rejected(RejectReason),
}

impl SendOutcome {
    /// Whether the assistant answered
    pub fn is_replied(&self) -> bool {
        matches!(self, SendOutcome::Replied { .. })
    }
}

/// A session opened for display
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    /// The session's current contents
    pub session: Session,
    /// Input state the view should show for it
    pub input_state: InputState,
}

/// Per-window send pipeline
pub struct ChatOrchestrator {
    config: Arc<ConfigStore>,
    sessions: Arc<SessionStore>,
    backend: Arc<dyn ChatBackend>,
    coordinator: Arc<ThinkingCoordinator>,
    view: Arc<dyn ChatView>,
    streaming: bool,
    cooldown: Arc<Mutex<Option<Instant>>>,
    countdown: Mutex<Option<JoinHandle<()>>>,
}

impl ChatOrchestrator {
    /// Wire the orchestrator to its collaborators
    pub fn new(
        config: Arc<ConfigStore>,
        sessions: Arc<SessionStore>,
        backend: Arc<dyn ChatBackend>,
        coordinator: Arc<ThinkingCoordinator>,
        view: Arc<dyn ChatView>,
    ) -> Self {
        Self {
            config,
            sessions,
            backend,
            coordinator,
            view,
            streaming: false,
            cooldown: Arc::new(Mutex::new(None)),
            countdown: Mutex::new(None),
        }
    }

    /// Report replies to the view as they stream in
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Session store
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Provider configuration store
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Thinking-state coordinator
    pub fn coordinator(&self) -> &Arc<ThinkingCoordinator> {
        &self.coordinator
    }

    fn is_displayed(&self, session_id: &str) -> bool {
        self.sessions.current_session_id().as_deref() == Some(session_id)
    }

    /// Seconds left on the rate-limit countdown, if it is running
    pub fn cooldown_remaining(&self) -> Option<u64> {
        let until = (*self.cooldown.lock().ok()?)?;
        let now = Instant::now();
        (until > now).then(|| ceil_secs(until - now))
    }

    fn precheck(&self) -> Option<RejectReason> {
        if self.backend.requires_local_config() && !self.config.is_configured() {
            self.view.show_error(NOT_CONFIGURED_MESSAGE);
            self.view.open_settings();
            return Some(RejectReason::NotConfigured);
        }
        if let Some(secs) = self.cooldown_remaining() {
            self.view.show_notice(&format!(
                "Rate limited. You can send again in {}s.",
                secs
            ));
            return Some(RejectReason::CoolingDown);
        }
        None
    }

    fn begin(&self, session_id: &str) -> Result<std::result::Result<ThinkingGuard, RejectReason>> {
        match self.coordinator.begin(session_id) {
            Ok(guard) => Ok(Ok(guard)),
            Err(e) => match e.downcast_ref::<ChatroomError>() {
                Some(ChatroomError::AnotherTabBusy) => {
                    self.view.show_error(ANOTHER_TAB_MESSAGE);
                    Ok(Err(RejectReason::AnotherTabBusy))
                }
                Some(ChatroomError::SessionBusy(_)) => {
                    self.view.show_notice(SESSION_BUSY_MESSAGE);
                    Ok(Err(RejectReason::SessionBusy))
                }
                _ => Err(e),
            },
        }
    }

    /// Send `message` from the current session
    ///
    /// Nothing is persisted when the send is rejected. Once accepted, the
    /// user message is appended to the current session, the request is
    /// issued with the turns that preceded it, and the reply is appended
    /// to the same session even if the user switched away meanwhile.
    pub async fn send(&self, message: &str) -> Result<SendOutcome> {
        let content = message.trim();
        if content.is_empty() {
            return Ok(SendOutcome::Rejected(RejectReason::EmptyMessage));
        }
        if let Some(reason) = self.precheck() {
            return Ok(SendOutcome::Rejected(reason));
        }

        let session = self.sessions.get_current_session()?;
        let session_id = session.id;
        let history = session.messages;

        let guard = match self.begin(&session_id)? {
            Ok(guard) => guard,
            Err(reason) => return Ok(SendOutcome::Rejected(reason)),
        };

        let user_message =
            self.sessions
                .add_message_to(&session_id, MessageKind::User, content, None)?;
        self.view.show_user_message(&user_message);

        self.dispatch(guard, content, &history).await
    }

    /// Ask again for the most recent user message of the current session
    ///
    /// A trailing assistant message is discarded from the store and the
    /// view first; earlier messages are kept.
    pub async fn regenerate(&self) -> Result<SendOutcome> {
        if let Some(reason) = self.precheck() {
            return Ok(SendOutcome::Rejected(reason));
        }

        let session = self.sessions.get_current_session()?;
        let Some(index) = session
            .messages
            .iter()
            .rposition(|m| m.kind == MessageKind::User)
        else {
            self.view.show_notice("There is no message to regenerate.");
            return Ok(SendOutcome::Rejected(RejectReason::NothingToRegenerate));
        };
        let content = session.messages[index].content.clone();
        let history = session.messages[..index].to_vec();

        let guard = match self.begin(&session.id)? {
            Ok(guard) => guard,
            Err(reason) => return Ok(SendOutcome::Rejected(reason)),
        };

        if session.last_message().map(|m| m.kind) == Some(MessageKind::Ai) {
            self.sessions.remove_last_message_from(&session.id)?;
            self.view.remove_last_ai_message();
        }

        tracing::info!(session_id = %session.id, "Regenerating reply");
        self.dispatch(guard, &content, &history).await
    }

    async fn dispatch(
        &self,
        guard: ThinkingGuard,
        content: &str,
        history: &[ChatMessage],
    ) -> Result<SendOutcome> {
        let session_id = guard.session_id().to_string();
        self.view.set_input_state(InputState::Thinking);
        self.view.show_typing();

        let result = if self.streaming {
            let sessions = Arc::clone(&self.sessions);
            let view = Arc::clone(&self.view);
            let target = session_id.clone();
            let mut on_delta = move |delta: &str| {
                if sessions.current_session_id().as_deref() == Some(target.as_str()) {
                    view.show_ai_delta(delta);
                }
            };
            self.backend
                .send_chat_request_streaming(content, history, &mut on_delta)
                .await
        } else {
            self.backend.send_chat_request(content, history).await
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => return Ok(self.fail(guard, session_id, e)),
        };

        let stored = match self.sessions.add_message_to(
            &session_id,
            MessageKind::Ai,
            &reply.content,
            None,
        ) {
            Ok(message) => Some(message),
            Err(e) if is_unknown_session(&e) => {
                tracing::warn!(session_id = %session_id, "Session was deleted before its reply arrived");
                None
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Failed to store reply");
                return Ok(self.fail(guard, session_id, e));
            }
        };
        guard.finish();

        if self.is_displayed(&session_id) {
            self.view.hide_typing();
            if let Some(message) = &stored {
                self.view.show_ai_message(message);
            }
            self.view.set_input_state(InputState::Ready);
        }
        Ok(SendOutcome::Replied { session_id, reply })
    }

    /// End a send that failed after it was accepted
    fn fail(&self, guard: ThinkingGuard, session_id: String, error: anyhow::Error) -> SendOutcome {
        guard.finish();
        let (kind, retry_after) = match error.downcast_ref::<ChatroomError>() {
            Some(err) => (err.kind(), err.retry_after()),
            None => ("other", None),
        };
        let message = error.to_string();
        tracing::warn!(session_id = %session_id, kind, error = %message, "Send failed");

        if self.is_displayed(&session_id) {
            self.present_failure(&error, kind, retry_after);
        }
        SendOutcome::Failed {
            session_id,
            kind,
            message,
            retry_after,
        }
    }

    fn present_failure(&self, error: &anyhow::Error, kind: &str, retry_after: Option<Duration>) {
        self.view.hide_typing();
        match (kind, retry_after) {
            ("config", _) => {
                self.view.show_error(&error.to_string());
                self.view.open_settings();
                self.view.set_input_state(InputState::Ready);
            }
            (_, Some(wait)) => {
                let secs = ceil_secs(wait);
                self.view.show_error(&format!(
                    "Too many requests. Please wait {}s before trying again.",
                    secs
                ));
                self.start_countdown(wait);
            }
            _ => {
                self.view.show_error(&format!(
                    "Sorry, something went wrong: {}. Please try again.",
                    error
                ));
                self.view.set_input_state(InputState::Ready);
            }
        }
    }

    /// Disable input for `wait`, ticking the remaining seconds once per
    /// second
    fn start_countdown(&self, wait: Duration) {
        let secs = ceil_secs(wait).max(1);
        let until = Instant::now() + Duration::from_secs(secs);
        if let Ok(mut cooldown) = self.cooldown.lock() {
            *cooldown = Some(until);
        }

        self.view
            .set_input_state(InputState::Waiting { remaining_secs: secs });

        let view = Arc::clone(&self.view);
        let cooldown = Arc::clone(&self.cooldown);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                Instant::now() + Duration::from_secs(1),
                Duration::from_secs(1),
            );
            let mut remaining = secs;
            while remaining > 1 {
                ticker.tick().await;
                remaining -= 1;
                view.set_input_state(InputState::Waiting {
                    remaining_secs: remaining,
                });
            }
            ticker.tick().await;
            if let Ok(mut cooldown) = cooldown.lock() {
                *cooldown = None;
            }
            view.set_input_state(InputState::Ready);
        });

        if let Ok(mut slot) = self.countdown.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Display another session
    ///
    /// The input state is `Thinking` when that session has a request
    /// outstanding from this window, otherwise `Ready` (or `Waiting` while
    /// a rate-limit countdown runs). Returns `None` for unknown ids.
    pub fn switch_session(&self, id: &str) -> Result<Option<SessionView>> {
        let Some(session) = self.sessions.switch_to_session(id)? else {
            return Ok(None);
        };
        let input_state = self.input_state_for(&session.id);
        if input_state == InputState::Thinking {
            self.view.show_typing();
        } else {
            self.view.hide_typing();
        }
        self.view.set_input_state(input_state);
        Ok(Some(SessionView {
            session,
            input_state,
        }))
    }

    /// Start and display a fresh session
    pub fn new_session(&self, title: Option<String>) -> Result<SessionView> {
        let session = self.sessions.create_session(title)?;
        let input_state = self.input_state_for(&session.id);
        self.view.hide_typing();
        self.view.set_input_state(input_state);
        Ok(SessionView {
            session,
            input_state,
        })
    }

    fn input_state_for(&self, session_id: &str) -> InputState {
        if self.coordinator.is_session_thinking(session_id) {
            InputState::Thinking
        } else if let Some(remaining_secs) = self.cooldown_remaining() {
            InputState::Waiting { remaining_secs }
        } else {
            InputState::Ready
        }
    }

    /// Stop the countdown and give up the thinking lease
    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.countdown.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.coordinator.teardown();
    }
}

fn is_unknown_session(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<ChatroomError>(),
        Some(ChatroomError::UnknownSession(_))
    )
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

use crate::session::ChatMessage;

/// State of the message input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    /// Accepting input
    Ready,
    /// A request for the displayed session is outstanding
    Thinking,
    /// Rate limited; input returns after the countdown
    Waiting {
        /// Whole seconds left
        remaining_secs: u64,
    },
}

impl std::fmt::Display for InputState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputState::Ready => write!(f, "ready"),
            InputState::Thinking => write!(f, "thinking"),
            InputState::Waiting { remaining_secs } => write!(f, "waiting {}s", remaining_secs),
        }
    }
}

/// Presentation surface driven by the orchestrator
///
/// Calls only concern the session currently displayed; results for
/// sessions the user navigated away from go to the store silently.
pub trait ChatView: Send + Sync {
    /// Append a user message to the transcript
    fn show_user_message(&self, message: &ChatMessage);

    /// Append an assistant message to the transcript
    fn show_ai_message(&self, message: &ChatMessage);

    /// Streamed fragment of the assistant message being received
    fn show_ai_delta(&self, _delta: &str) {}

    /// Show the transient typing placeholder
    fn show_typing(&self);

    /// Remove the typing placeholder
    fn hide_typing(&self);

    /// Show an inline error entry (never persisted)
    fn show_error(&self, message: &str);

    /// Show an informational line
    fn show_notice(&self, _message: &str) {}

    /// Enable or disable the input
    fn set_input_state(&self, state: InputState);

    /// Bring up the configuration surface
    fn open_settings(&self);

    /// Drop the trailing assistant message from the transcript
    fn remove_last_ai_message(&self);
}

/// View that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullView;

impl ChatView for NullView {
    fn show_user_message(&self, _message: &ChatMessage) {}
    fn show_ai_message(&self, _message: &ChatMessage) {}
    fn show_typing(&self) {}
    fn hide_typing(&self) {}
    fn show_error(&self, _message: &str) {}
    fn set_input_state(&self, _state: InputState) {}
    fn open_settings(&self) {}
    fn remove_last_ai_message(&self) {}
}

//! Interactive chat and one-shot sends
//!
//! The REPL drives a [`ChatOrchestrator`] through a [`TerminalView`]:
//! replies print as they arrive, errors go to stderr, and slash commands
//! manage sessions.

use super::special_commands::{parse_special_command, print_help, SpecialCommand};
use super::App;
use crate::chat::{ChatOrchestrator, ChatView, InputState, RejectReason, SendOutcome};
use crate::error::{ChatroomError, Result};
use crate::session::{ChatMessage, MessageKind, Session};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Terminal rendition of the chat surface
#[derive(Debug, Default)]
pub struct TerminalView {
    echo_user: bool,
    streamed: AtomicBool,
    typing: AtomicBool,
    last_state: Mutex<Option<InputState>>,
}

impl TerminalView {
    /// View for the REPL, where the user's own line is already on screen
    pub fn interactive() -> Self {
        Self::default()
    }

    /// View for one-shot sends
    pub fn one_shot() -> Self {
        Self {
            echo_user: true,
            ..Self::default()
        }
    }

    fn clear_typing(&self) {
        if self.typing.swap(false, Ordering::SeqCst) {
            eprint!("\r\x1b[2K");
            let _ = std::io::stderr().flush();
        }
    }
}

impl ChatView for TerminalView {
    fn show_user_message(&self, message: &ChatMessage) {
        if self.echo_user {
            println!("{} {}", "you>".green().bold(), message.content);
        }
    }

    fn show_ai_message(&self, message: &ChatMessage) {
        self.clear_typing();
        if self.streamed.swap(false, Ordering::SeqCst) {
            println!();
        } else {
            println!("{} {}", "assistant>".cyan().bold(), message.content);
        }
        println!();
    }

    fn show_ai_delta(&self, delta: &str) {
        self.clear_typing();
        if !self.streamed.swap(true, Ordering::SeqCst) {
            print!("{} ", "assistant>".cyan().bold());
        }
        print!("{}", delta);
        let _ = std::io::stdout().flush();
    }

    fn show_typing(&self) {
        if !self.typing.swap(true, Ordering::SeqCst) {
            eprint!("{}", "thinking...".dimmed());
            let _ = std::io::stderr().flush();
        }
    }

    fn hide_typing(&self) {
        self.clear_typing();
    }

    fn show_error(&self, message: &str) {
        self.clear_typing();
        if self.streamed.swap(false, Ordering::SeqCst) {
            println!();
        }
        eprintln!("{} {}", "error:".red().bold(), message);
    }

    fn show_notice(&self, message: &str) {
        println!("{}", message.yellow());
    }

    fn set_input_state(&self, state: InputState) {
        let Ok(mut last) = self.last_state.lock() else {
            return;
        };
        let previous = last.replace(state);
        match (previous, state) {
            (Some(InputState::Waiting { .. }), InputState::Ready) => {
                println!("{}", "You can send messages again.".green());
            }
            (Some(InputState::Waiting { .. }), InputState::Waiting { .. }) => {}
            (_, InputState::Waiting { remaining_secs }) => {
                println!(
                    "{}",
                    format!("Input paused for {}s.", remaining_secs).yellow()
                );
            }
            _ => {}
        }
        tracing::trace!(state = %state, "Input state changed");
    }

    fn open_settings(&self) {
        println!(
            "Configure the provider with {}",
            "chatroom config set --api-key <KEY> --base-url <URL> --model <MODEL>".cyan()
        );
    }

    fn remove_last_ai_message(&self) {
        println!("{}", "(previous reply discarded)".dimmed());
    }
}

fn print_transcript(session: &Session, with_ids: bool) {
    println!(
        "{} {} ({} messages)",
        "session".bold(),
        session.title.bold(),
        session.message_count
    );
    for message in &session.messages {
        let label = match message.kind {
            MessageKind::User => "you>".green().bold(),
            MessageKind::Ai => "assistant>".cyan().bold(),
        };
        if with_ids {
            println!("{} {} {}", message.id.dimmed(), label, message.content);
        } else {
            println!("{} {}", label, message.content);
        }
    }
    println!();
}

fn print_welcome_banner(session: &Session) {
    println!("{}", "chatroom".bold());
    println!(
        "Session {} ({}). Type {} for commands.\n",
        session.title.cyan(),
        session.id.dimmed(),
        "/help".cyan()
    );
}

fn prompt_for(orchestrator: &ChatOrchestrator) -> String {
    let title = orchestrator
        .sessions()
        .get_current_session()
        .map(|s| s.title)
        .unwrap_or_default();
    format!("[{}] > ", title)
}

/// Start the interactive chat
///
/// # Arguments
///
/// * `app` - Loaded stores and settings
/// * `stream` - Print replies as they arrive
/// * `session` - Session to open instead of the current one
pub async fn run_chat(app: &App, stream: bool, session: Option<String>) -> Result<()> {
    tracing::info!("Starting interactive chat mode");

    let view = Arc::new(TerminalView::interactive());
    let orchestrator = app.orchestrator(view, stream)?;
    if let Some(id) = session {
        if orchestrator.switch_session(&id)?.is_none() {
            return Err(ChatroomError::UnknownSession(id).into());
        }
    }

    let current = orchestrator.sessions().get_current_session()?;
    print_welcome_banner(&current);
    if current.message_count > 0 {
        print_transcript(&current, false);
    }

    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline(&prompt_for(&orchestrator)) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed)?;

                let command = match parse_special_command(trimmed) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{}", e.to_string().red());
                        continue;
                    }
                };
                if command == SpecialCommand::Exit {
                    break;
                }
                if let Err(e) = handle_line(&orchestrator, command, trimmed).await {
                    eprintln!("{} {}", "error:".red().bold(), e);
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                orchestrator.shutdown();
                return Err(e.into());
            }
        }
    }

    orchestrator.shutdown();
    println!("Goodbye!");
    Ok(())
}

async fn handle_line(
    orchestrator: &ChatOrchestrator,
    command: SpecialCommand,
    line: &str,
) -> Result<()> {
    let sessions = orchestrator.sessions();
    match command {
        SpecialCommand::None => {
            orchestrator.send(line).await?;
        }
        SpecialCommand::NewSession(title) => {
            let view = orchestrator.new_session(title)?;
            println!("Started {} ({})", view.session.title.cyan(), view.session.id);
        }
        SpecialCommand::ListSessions => super::sessions::print_session_table(sessions),
        SpecialCommand::Switch(id) => match orchestrator.switch_session(&id)? {
            Some(view) => print_transcript(&view.session, false),
            None => eprintln!("{}", format!("No session {}", id).red()),
        },
        SpecialCommand::Rename(title) => {
            if let Some(id) = sessions.current_session_id() {
                sessions.rename_session(&id, &title)?;
                println!("Renamed to {}", title.cyan());
            }
        }
        SpecialCommand::Clear => {
            if let Some(id) = sessions.current_session_id() {
                sessions.clear_session(&id)?;
                println!("Session cleared");
            }
        }
        SpecialCommand::Delete(id) => {
            if orchestrator.coordinator().is_session_thinking(&id) {
                eprintln!("{}", "That session is still waiting for a reply".red());
            } else if sessions.delete_session(&id)? {
                println!("Deleted {}", id);
            } else {
                eprintln!("{}", format!("No session {}", id).red());
            }
        }
        SpecialCommand::Regenerate => {
            orchestrator.regenerate().await?;
        }
        SpecialCommand::Edit {
            message_id,
            content,
        } => {
            if sessions.edit_message(&message_id, &content)? {
                println!("Message updated; use /regenerate to ask again");
            } else {
                eprintln!("{}", "Only your own messages in this session can be edited".red());
            }
        }
        SpecialCommand::History => print_transcript(&sessions.get_current_session()?, true),
        SpecialCommand::Status => {
            let stats = orchestrator.coordinator().stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        SpecialCommand::Help => print_help(),
        SpecialCommand::Exit => {}
    }
    Ok(())
}

/// Send one message and print the reply
///
/// Fails when the message was rejected or the request failed, so the
/// process exits non-zero.
pub async fn run_send(app: &App, message: &str, session: Option<String>) -> Result<()> {
    let orchestrator = app.orchestrator(Arc::new(TerminalView::one_shot()), false)?;
    if let Some(id) = session {
        if orchestrator.switch_session(&id)?.is_none() {
            return Err(ChatroomError::UnknownSession(id).into());
        }
    }

    let outcome = orchestrator.send(message).await;
    orchestrator.shutdown();

    match outcome? {
        SendOutcome::Replied { reply, .. } => {
            tracing::debug!(attempts = reply.attempts, "Reply received");
            Ok(())
        }
        SendOutcome::Failed { message, .. } => Err(anyhow::anyhow!(message)),
        SendOutcome::Rejected(reason) => Err(rejection_error(reason).into()),
    }
}

fn rejection_error(reason: RejectReason) -> ChatroomError {
    match reason {
        RejectReason::EmptyMessage => ChatroomError::EmptyMessage,
        RejectReason::NotConfigured => {
            ChatroomError::Config("The provider is not configured".to_string())
        }
        RejectReason::AnotherTabBusy => ChatroomError::AnotherTabBusy,
        RejectReason::SessionBusy => {
            ChatroomError::SessionBusy("current session".to_string())
        }
        RejectReason::CoolingDown => ChatroomError::RateLimit {
            retry_after: std::time::Duration::from_secs(1),
            message: "Still waiting out a rate limit".to_string(),
        },
        RejectReason::NothingToRegenerate => {
            ChatroomError::Validation(vec!["There is no message to regenerate".to_string()])
        }
    }
}

//! Special commands parser for interactive chat mode
//!
//! Lines starting with `/` manage sessions instead of being sent:
//! - Create, list, switch, rename, clear and delete sessions
//! - Regenerate the last reply or edit an earlier message
//! - Display help information
//! - Exit the session
//!
//! Command names are case-insensitive; arguments keep their case.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a new session, optionally titled
    NewSession(Option<String>),

    /// List every session
    ListSessions,

    /// Display another session
    Switch(String),

    /// Rename the current session
    Rename(String),

    /// Remove every message from the current session
    Clear,

    /// Delete a session
    Delete(String),

    /// Ask again for the last user message
    Regenerate,

    /// Replace the text of one of the current session's user messages
    Edit { message_id: String, content: String },

    /// Show the current session's messages with their ids
    History,

    /// Show thinking-state diagnostics
    Status,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command; send the input as a chat message
    None,
}

fn required(command: &str, usage: &str, arg: &str) -> Result<String, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingArgument {
            command: command.to_string(),
            usage: usage.to_string(),
        })
    } else {
        Ok(arg.to_string())
    }
}

/// Parse a user input string into a special command
///
/// # Errors
///
/// Returns CommandError::UnknownCommand if input starts with "/" but is not a valid command.
/// Returns CommandError::MissingArgument if a command requires an argument but none was provided.
///
/// # Examples
///
/// ```
/// use chatroom::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// let cmd = parse_special_command("/switch session_abc").unwrap();
/// assert_eq!(cmd, SpecialCommand::Switch("session_abc".to_string()));
///
/// let cmd = parse_special_command("hello there").unwrap();
/// assert_eq!(cmd, SpecialCommand::None);
///
/// assert!(parse_special_command("/foo").is_err());
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') {
        return Ok(match lower.as_str() {
            "exit" | "quit" => SpecialCommand::Exit,
            _ => SpecialCommand::None,
        });
    }

    let (name, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((name, rest)) => (name.to_lowercase(), rest.trim()),
        None => (lower.clone(), ""),
    };

    match name.as_str() {
        "/new" => Ok(SpecialCommand::NewSession(
            (!arg.is_empty()).then(|| arg.to_string()),
        )),
        "/sessions" | "/ls" => Ok(SpecialCommand::ListSessions),
        "/switch" => required("/switch", "/switch <session_id>", arg).map(SpecialCommand::Switch),
        "/rename" => required("/rename", "/rename <title>", arg).map(SpecialCommand::Rename),
        "/clear" => Ok(SpecialCommand::Clear),
        "/delete" => required("/delete", "/delete <session_id>", arg).map(SpecialCommand::Delete),
        "/regenerate" | "/retry" => Ok(SpecialCommand::Regenerate),
        "/edit" => {
            let usage = "/edit <message_id> <text>";
            let (message_id, content) = arg
                .split_once(char::is_whitespace)
                .map(|(id, text)| (id, text.trim()))
                .unwrap_or((arg, ""));
            let message_id = required("/edit", usage, message_id)?;
            let content = required("/edit", usage, content)?;
            Ok(SpecialCommand::Edit {
                message_id,
                content,
            })
        }
        "/history" => Ok(SpecialCommand::History),
        "/status" => Ok(SpecialCommand::Status),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/exit" | "/quit" => Ok(SpecialCommand::Exit),
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Print help for the interactive chat
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Chat
=====================================

SESSIONS:
  /new [title]        - Start a new session
  /sessions           - List sessions (current one marked with *)
  /switch <id>        - Display another session
  /rename <title>     - Rename the current session
  /clear              - Remove every message from the current session
  /delete <id>        - Delete a session

MESSAGES:
  /regenerate         - Ask again for the last message
  /history            - Show the current session with message ids
  /edit <id> <text>   - Change one of your earlier messages

OTHER:
  /status             - Show thinking-state diagnostics
  /help               - Show this help
  /quit, exit         - Leave the chat
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(
            parse_special_command("hello there").unwrap(),
            SpecialCommand::None
        );
    }

    #[test]
    fn test_exit_aliases() {
        for input in ["exit", "QUIT", "/quit", "/exit"] {
            assert_eq!(parse_special_command(input).unwrap(), SpecialCommand::Exit);
        }
    }

    #[test]
    fn test_new_with_and_without_title() {
        assert_eq!(
            parse_special_command("/new").unwrap(),
            SpecialCommand::NewSession(None)
        );
        assert_eq!(
            parse_special_command("/new Trip Plans").unwrap(),
            SpecialCommand::NewSession(Some("Trip Plans".to_string()))
        );
    }

    #[test]
    fn test_switch_keeps_argument_case() {
        assert_eq!(
            parse_special_command("/SWITCH session_ABC").unwrap(),
            SpecialCommand::Switch("session_ABC".to_string())
        );
    }

    #[test]
    fn test_switch_requires_id() {
        assert!(matches!(
            parse_special_command("/switch"),
            Err(CommandError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_rename_takes_rest_of_line() {
        assert_eq!(
            parse_special_command("/rename  My long title ").unwrap(),
            SpecialCommand::Rename("My long title".to_string())
        );
    }

    #[test]
    fn test_edit_parses_id_and_text() {
        assert_eq!(
            parse_special_command("/edit msg_1 new words here").unwrap(),
            SpecialCommand::Edit {
                message_id: "msg_1".to_string(),
                content: "new words here".to_string()
            }
        );
        assert!(parse_special_command("/edit msg_1").is_err());
        assert!(parse_special_command("/edit").is_err());
    }

    #[test]
    fn test_regenerate_alias() {
        assert_eq!(
            parse_special_command("/retry").unwrap(),
            SpecialCommand::Regenerate
        );
    }

    #[test]
    fn test_unknown_command() {
        let err = parse_special_command("/foo bar").unwrap_err();
        assert_eq!(err, CommandError::UnknownCommand("/foo bar".to_string()));
        assert!(err.to_string().contains("/help"));
    }
}

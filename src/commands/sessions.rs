use super::App;
use crate::cli::SessionCommand;
use crate::error::{ChatroomError, Result};
use crate::session::{MessageKind, SessionStore};
use colored::Colorize;
use prettytable::{format, Table};

const TITLE_COLUMN_CHARS: usize = 40;

fn shorten(title: &str) -> String {
    if title.chars().count() > TITLE_COLUMN_CHARS {
        let head: String = title.chars().take(TITLE_COLUMN_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        title.to_string()
    }
}

/// Print every session as a table, most recently updated first
pub fn print_session_table(sessions: &SessionStore) {
    let all = sessions.get_all_sessions();
    if all.is_empty() {
        println!("{}", "No sessions found.".yellow());
        return;
    }

    let current = sessions.current_session_id();
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "",
        "ID".bold(),
        "Title".bold(),
        "Messages".bold(),
        "Last Updated".bold()
    ]);

    for session in all {
        let marker = if current.as_deref() == Some(session.id.as_str()) {
            "*"
        } else {
            ""
        };
        let updated = session
            .updated_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string();

        table.add_row(prettytable::row![
            marker,
            session.id.cyan(),
            shorten(&session.title),
            session.message_count,
            updated
        ]);
    }

    println!("\nSessions:");
    table.printstd();
    println!();
}

/// Handle session commands
pub fn handle_sessions(app: &App, command: SessionCommand) -> Result<()> {
    let sessions = app.sessions();

    match command {
        SessionCommand::List { json } => {
            if json {
                let all = sessions.get_all_sessions();
                println!("{}", serde_json::to_string_pretty(&all)?);
            } else {
                print_session_table(sessions);
                println!(
                    "Use {} to continue a session.",
                    "chatroom chat --session <ID>".cyan()
                );
                println!();
            }
        }
        SessionCommand::Show { id } => {
            let session = match id {
                Some(id) => sessions
                    .get_session(&id)
                    .ok_or(ChatroomError::UnknownSession(id))?,
                None => sessions.get_current_session()?,
            };
            println!("{} {}", session.title.bold(), session.id.dimmed());
            for message in &session.messages {
                let label = match message.kind {
                    MessageKind::User => "you>".green().bold(),
                    MessageKind::Ai => "assistant>".cyan().bold(),
                };
                println!("{} {}", label, message.content);
            }
        }
        SessionCommand::New { title } => {
            let session = sessions.create_session(title)?;
            println!("Created {} ({})", session.title.cyan(), session.id);
        }
        SessionCommand::Switch { id } => {
            let session = sessions
                .switch_to_session(&id)?
                .ok_or(ChatroomError::UnknownSession(id))?;
            println!("Switched to {}", session.title.cyan());
        }
        SessionCommand::Rename { id, title } => {
            if !sessions.rename_session(&id, &title)? {
                return Err(ChatroomError::UnknownSession(id).into());
            }
            println!("Renamed {} to {}", id, title.cyan());
        }
        SessionCommand::Clear { id } => {
            let id = match id {
                Some(id) => id,
                None => sessions.get_current_session()?.id,
            };
            if !sessions.clear_session(&id)? {
                return Err(ChatroomError::UnknownSession(id).into());
            }
            println!("Cleared {}", id);
        }
        SessionCommand::Delete { id } => {
            if !sessions.delete_session(&id)? {
                return Err(ChatroomError::UnknownSession(id).into());
            }
            println!("Deleted {}", id);
        }
        SessionCommand::Export { output } => {
            let document = sessions.export_sessions()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, document)?;
                    println!("Exported {} sessions to {}", sessions.len(), path.display());
                }
                None => println!("{}", document),
            }
        }
        SessionCommand::Import { file } => {
            let document = std::fs::read_to_string(&file)?;
            let count = sessions.import_sessions(&document)?;
            println!("Imported {} sessions from {}", count, file.display());
        }
    }

    Ok(())
}

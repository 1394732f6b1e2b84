//! Command-line interface definition for chatroom
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for chatting, managing sessions and provider
//! configuration, and running the HTTP proxy.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// chatroom - multi-session chat client for OpenAI-compatible APIs
#[derive(Parser, Debug, Clone)]
#[command(name = "chatroom")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/chatroom.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// SQLite file holding sessions, provider settings and the thinking lease
    #[arg(long, env = "CHATROOM_DB")]
    pub storage_path: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for chatroom
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat
    Chat {
        /// Print replies as they stream in
        #[arg(short, long)]
        stream: bool,

        /// Session to open instead of the current one
        #[arg(long)]
        session: Option<String>,
    },

    /// Send one message and print the reply
    Send {
        /// Message text
        message: String,

        /// Session to send from instead of the current one
        #[arg(long)]
        session: Option<String>,
    },

    /// Manage stored sessions
    Sessions {
        /// Session subcommand
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Manage the provider configuration
    Config {
        /// Configuration subcommand
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run the HTTP proxy
    Serve {
        /// Listen address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

/// Session management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// List sessions, most recently updated first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print a session's transcript
    Show {
        /// Session id (defaults to the current session)
        id: Option<String>,
    },

    /// Create a session and make it current
    New {
        /// Initial title
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Make a session current
    Switch {
        /// Session id
        id: String,
    },

    /// Rename a session
    Rename {
        /// Session id
        id: String,
        /// New title
        title: String,
    },

    /// Remove every message from a session
    Clear {
        /// Session id (defaults to the current session)
        id: Option<String>,
    },

    /// Delete a session
    Delete {
        /// Session id
        id: String,
    },

    /// Write every session to a JSON document
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace every session with the contents of a JSON document
    Import {
        /// Input file
        file: PathBuf,
    },
}

/// Provider configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Show the provider configuration (the key is never printed)
    Show,

    /// Update provider fields
    Set {
        /// API key
        #[arg(long)]
        api_key: Option<String>,

        /// Base URL of the OpenAI-compatible API
        #[arg(long)]
        base_url: Option<String>,

        /// Model identifier
        #[arg(long)]
        model: Option<String>,

        /// Completion token cap
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f64>,

        /// Provider label
        #[arg(long)]
        provider: Option<String>,
    },

    /// Restore the default provider configuration
    Reset,

    /// Send a test prompt with the stored configuration
    Test,

    /// Write the configuration, minus the key, as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a configuration document, keeping the current key
    Import {
        /// Input file
        file: PathBuf,
    },

    /// List the models offered by the provider
    Models,

    /// Check that the provider base URL is reachable
    Health,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/chatroom.yaml".to_string()),
            verbose: false,
            storage_path: None,
            command: Commands::Sessions {
                command: SessionCommand::List { json: false },
            },
        }
    }
}

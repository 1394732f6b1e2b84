//! chatroom - multi-session chat client
//!
#![doc = "chatroom - multi-session chat client"]
#![doc = "Main entry point for the chatroom application."]

use anyhow::Result;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chatroom::cli::{Cli, Commands};
use chatroom::client::metrics::init_metrics_exporter;
use chatroom::commands::{self, App};
use chatroom::config::AppConfig;
use chatroom::server::{run_server, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/chatroom.yaml");
    let config = AppConfig::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Chat { stream, session } => {
            let app = App::open(config)?;
            commands::chat::run_chat(&app, stream, session).await?;
        }
        Commands::Send { message, session } => {
            let app = App::open(config)?;
            commands::chat::run_send(&app, &message, session).await?;
        }
        Commands::Sessions { command } => {
            let app = App::open(config)?;
            commands::sessions::handle_sessions(&app, command)?;
        }
        Commands::Config { command } => {
            let app = App::open(config)?;
            commands::config::handle_config(&app, command).await?;
        }
        Commands::Serve { host, port } => {
            tracing::info!("Starting HTTP proxy");
            init_metrics_exporter();

            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let app = App::open(config)?;
            if !app.config().is_configured() {
                tracing::warn!("Provider is not configured; chat requests will be refused");
            }

            let state = Arc::new(AppState::new(app.direct_client()?, &app.settings().server));
            run_server(state, &host, port).await?;
        }
    }

    Ok(())
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool) {
    let default = if verbose { "chatroom=debug" } else { "chatroom=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

use super::App;
use crate::api_config::{ApiConfigUpdate, PublicApiConfig};
use crate::cli::ConfigCommand;
use crate::error::{ChatroomError, Result};
use colored::Colorize;
use prettytable::{format, Table};

fn print_config(config: &PublicApiConfig) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    let optional = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
    table.add_row(prettytable::row!["Provider".bold(), config.api_provider]);
    table.add_row(prettytable::row!["Base URL".bold(), config.base_url]);
    table.add_row(prettytable::row!["Model".bold(), config.model]);
    table.add_row(prettytable::row![
        "Max tokens".bold(),
        optional(config.max_tokens.map(|v| v.to_string()))
    ]);
    table.add_row(prettytable::row![
        "Temperature".bold(),
        optional(config.temperature.map(|v| v.to_string()))
    ]);
    table.add_row(prettytable::row![
        "API key".bold(),
        if config.has_api_key {
            "set".green()
        } else {
            "missing".red()
        }
    ]);
    table.add_row(prettytable::row![
        "Configured".bold(),
        if config.is_configured {
            "yes".green()
        } else {
            "no".red()
        }
    ]);

    table.printstd();
}

fn print_validation(error: &anyhow::Error) -> bool {
    if let Some(ChatroomError::Validation(errors)) = error.downcast_ref::<ChatroomError>() {
        eprintln!("{}", "Configuration not saved:".red().bold());
        for message in errors {
            eprintln!("  - {}", message);
        }
        true
    } else {
        false
    }
}

/// Handle provider configuration commands
pub async fn handle_config(app: &App, command: ConfigCommand) -> Result<()> {
    let store = app.config();

    match command {
        ConfigCommand::Show => print_config(&store.public_config()),
        ConfigCommand::Set {
            api_key,
            base_url,
            model,
            max_tokens,
            temperature,
            provider,
        } => {
            let update = ApiConfigUpdate {
                api_provider: provider,
                api_key,
                base_url,
                model,
                max_tokens,
                temperature,
            };
            if update.is_empty() {
                println!("{}", "Nothing to update.".yellow());
                return Ok(());
            }
            if let Err(e) = store.update(&update) {
                print_validation(&e);
                return Err(e);
            }
            println!("{}", "Configuration saved.".green());
            print_config(&store.public_config());
        }
        ConfigCommand::Reset => {
            store.reset()?;
            println!("{}", "Configuration reset to defaults.".green());
        }
        ConfigCommand::Test => {
            let client = app.direct_client()?;
            let result = client.test_connection(&store.get()).await;
            if result.success {
                println!("{} {}", "ok:".green().bold(), result.message);
                if let Some(reply) = result.response {
                    println!("{}", reply.dimmed());
                }
            } else {
                return Err(ChatroomError::Config(result.message).into());
            }
        }
        ConfigCommand::Export { output } => {
            let document = store.export()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, document)?;
                    println!("Exported configuration to {}", path.display());
                }
                None => println!("{}", document),
            }
        }
        ConfigCommand::Import { file } => {
            let document = std::fs::read_to_string(&file)?;
            match store.import(&document) {
                Ok(_) => {
                    println!("Imported configuration from {}", file.display());
                    print_config(&store.public_config());
                }
                Err(e) => {
                    print_validation(&e);
                    return Err(e);
                }
            }
        }
        ConfigCommand::Models => {
            let models = app.direct_client()?.list_models().await?;
            if models.is_empty() {
                println!("{}", "The provider reported no models.".yellow());
            }
            let current = store.get().model;
            for model in models {
                if model == current {
                    println!("{} {}", "*".green(), model.green());
                } else {
                    println!("  {}", model);
                }
            }
        }
        ConfigCommand::Health => {
            let health = app.direct_client()?.check_health().await;
            if health.healthy {
                println!("{} {}", "ok:".green().bold(), health.message);
            } else {
                return Err(ChatroomError::Network(health.message).into());
            }
        }
    }

    Ok(())
}

//! onionctl binary entry point
//!
//! Sets up logging for the chosen command, loads the config and dispatches.

use clap::Parser;
use color_eyre::eyre::Result;
use onionctl::{cli::Args, cli::Command, commands, config::Config, logging, status::Mode};

/// Stderr logging plus config, for every command except `watch`
fn setup_cli(mode_override: Option<Mode>) -> Result<(Config, Mode)> {
    logging::init_cli_logging();
    let config = Config::load()?;
    let mode = mode_override.unwrap_or(config.settings.mode);
    Ok((config, mode))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let mode_override = args.mode_override();

    match args.command {
        // No subcommand - show status
        None => {
            let (config, mode) = setup_cli(mode_override)?;
            commands::status(&config, mode, false).await
        }

        Some(Command::Status { json }) => {
            let (config, mode) = setup_cli(mode_override)?;
            commands::status(&config, mode, json).await
        }

        Some(Command::Start) => {
            let (config, mode) = setup_cli(mode_override)?;
            commands::start(&config, mode).await
        }

        Some(Command::Stop) => {
            let (config, mode) = setup_cli(mode_override)?;
            commands::stop(&config, mode).await
        }

        Some(Command::Detect { json }) => {
            let (config, mode) = setup_cli(mode_override)?;
            commands::detect(&config, mode, json).await
        }

        Some(Command::Install) => {
            let (config, _) = setup_cli(mode_override)?;
            commands::install(&config).await
        }

        Some(Command::Validate) => {
            let (config, _) = setup_cli(mode_override)?;
            commands::validate(&config);
            Ok(())
        }

        // Logging goes to a file unless in the foreground; the guard flushes it on exit
        Some(Command::Watch { foreground }) => {
            let config = Config::load()?;
            let mode = mode_override.unwrap_or(config.settings.mode);
            let _guard = if foreground {
                logging::init_foreground_logging(&config.settings.log_level);
                None
            } else {
                Some(logging::init_file_logging(&config.settings.log_level, mode)?)
            };
            commands::watch(&config, mode, foreground).await
        }
    }
}

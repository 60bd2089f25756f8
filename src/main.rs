//! chat-probe - WebSocket console probe
//!
//! Opens one connection to a chat server, prints each message payload to
//! stdout as it arrives and prints "socket closed" when the connection ends.

mod cli;
mod client;
mod config;
mod error;
mod logging;
mod version;

use clap::Parser;
use tracing::{error, info};

use crate::cli::{Cli, Commands, ConfigSubcommand};
use crate::client::{ConnectOptions, ConsoleHandler};
use crate::config::ProbeConfig;
use crate::error::{Error, Result};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    let (url, config_path) = match cli.command_or_listen() {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand);
        }
        Commands::Listen { url, config } => (url, config),
    };

    let config = ProbeConfig::load_with_url(config_path.as_deref(), url.as_deref())?;

    let log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        "Starting chat-probe"
    );

    let result = listen(&config);
    if let Err(ref e) = result {
        error!(
            error = %e.format_for_log(),
            retryable = e.is_retryable(),
            fatal = e.is_fatal(),
            "Probe failed"
        );
    }

    // flush file logs before main decides the exit code
    drop(log_guards);
    result
}

/// Connect, print events until the socket closes
fn listen(config: &ProbeConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    let options = ConnectOptions::from(&config.connection);

    runtime.block_on(async {
        let mut connection = client::connect(&config.connection.url, &options).await?;
        info!(url = %connection.url(), "Listening");
        let mut console = ConsoleHandler::stdout();

        connection.run(&mut console, shutdown_signal()).await?;
        Ok(())
    })
}

/// Resolves on Ctrl+C; never resolves if the signal handler cannot be installed
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = ProbeConfig::load(config.as_deref())?;
            print!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration file created: {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            ProbeConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}

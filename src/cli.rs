//! CLI argument parsing using clap v4

use clap::{Parser, Subcommand};

/// chat-probe - WebSocket console probe
///
/// Connects to a chat server's WebSocket endpoint and prints every message it
/// receives, followed by "socket closed" when the connection ends.
#[derive(Parser, Debug)]
#[command(name = "chat-probe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all diagnostics except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Command to run (defaults to `listen`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Connect and print incoming messages until the socket closes
    Listen {
        /// WebSocket URL (overrides the configuration file)
        #[arg(short, long)]
        url: Option<String>,

        /// Path to configuration file
        #[arg(short, long, env = "CHAT_PROBE_CONFIG")]
        config: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

impl Cli {
    /// The command to run, with `listen` filled in when none was given
    pub fn command_or_listen(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Listen {
            url: None,
            config: None,
        })
    }
}

//! Cortex command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};
use cortex_core::config::{Config, LoggingConfig};
use std::path::PathBuf;

/// Cortex - chat relay gateway
#[derive(Parser)]
#[command(name = "cortex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true, env = "CORTEX_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run or inspect the gateway server
    Gateway(commands::gateway::GatewayArgs),

    /// Configuration management
    Config(commands::config::ConfigArgs),

    /// Show version information
    Version,
}

impl Cli {
    /// Load the configuration this invocation points at, with environment
    /// overrides applied.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        Ok(Config::load_from(self.config.as_deref())?)
    }
}

/// `EnvFilter` directive for the configured level, raised by `-v` flags.
pub fn log_directive(logging: &LoggingConfig, verbose: u8) -> String {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    format!("cortex={},tower_http={}", level, level)
}

/// Run the CLI with the given arguments.
pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::Gateway(args) => commands::gateway::run(args, config).await,
        Commands::Config(args) => commands::config::run(args, config, cli.config).await,
        Commands::Version => {
            println!("cortex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

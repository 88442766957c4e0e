//! Cortex CLI entry point.

use clap::Parser;
use cortex_cli::{log_directive, run, Cli, Commands};
use cortex_core::config::{Config, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging is not up yet; report after init.
    let dotenv = cortex_core::env::load_dotenv();

    let cli = Cli::parse();

    // `config` subcommands must still work against a broken file so they can
    // report or replace it.
    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) if matches!(cli.command, Commands::Config(_)) => {
            eprintln!("warning: {}", e);
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
        Err(e) => return Err(e),
    };

    init_logging(&config.logging, cli.verbose);
    if let Err(e) = dotenv {
        tracing::warn!("Failed to load .env: {}", e);
    }

    run(cli, config).await
}

fn init_logging(logging: &LoggingConfig, verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directive(logging, verbose)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

//! Gateway command.

use clap::Args;
use cortex_core::config::{BindMode, Config};
use cortex_gateway::{Gateway, GatewayConfig};
use std::time::Duration;
use tracing::info;

/// Gateway command arguments.
#[derive(Args)]
pub struct GatewayArgs {
    #[command(subcommand)]
    pub command: GatewayCommand,
}

#[derive(clap::Subcommand)]
pub enum GatewayCommand {
    /// Start the gateway server
    Run {
        /// Bind mode (loopback, lan)
        #[arg(short, long)]
        bind: Option<BindMode>,

        /// Port number
        #[arg(short, long)]
        port: Option<u16>,

        /// Upstream engine WebSocket URL
        #[arg(short, long)]
        upstream: Option<String>,
    },

    /// Show gateway status
    Status,
}

/// Run the gateway command.
pub async fn run(args: GatewayArgs, mut config: Config) -> anyhow::Result<()> {
    match args.command {
        GatewayCommand::Run {
            bind,
            port,
            upstream,
        } => {
            apply_overrides(&mut config, bind, port, upstream);
            config.validate()?;

            info!(
                "Relaying port {} to {} ({:?} correlation)",
                config.gateway.port, config.upstream.url, config.upstream.correlation
            );

            let gateway = Gateway::new(GatewayConfig::from(&config));
            gateway.run().await?;
        }

        GatewayCommand::Status => {
            let port = config.gateway.port;
            match fetch_health(port).await {
                Ok(health) => {
                    println!("Gateway is running on port {}", port);
                    println!("  upstream: {}", field(&health, "upstream"));
                    println!("  sessions: {}", field(&health, "sessions"));
                    println!("  pending:  {}", field(&health, "pending"));
                }
                Err(e) => {
                    println!("Gateway is not running on port {} ({})", port, e);
                }
            }
        }
    }

    Ok(())
}

fn apply_overrides(
    config: &mut Config,
    bind: Option<BindMode>,
    port: Option<u16>,
    upstream: Option<String>,
) {
    if let Some(bind) = bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }
    if let Some(url) = upstream {
        config.upstream.url = url;
    }
}

async fn fetch_health(port: u16) -> anyhow::Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    let health = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(health)
}

fn field(value: &serde_json::Value, key: &str) -> String {
    match value.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "?".to_string(),
    }
}

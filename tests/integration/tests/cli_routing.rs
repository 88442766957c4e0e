//! CLI routing tests.
//!
//! These drive `cortex_cli::run` in-process with parsed argument vectors, the
//! same path the `cortex` binary takes after argument parsing.

use clap::Parser;
use cortex_cli::{run, Cli};
use tempfile::TempDir;

async fn cortex(args: &[&str]) -> anyhow::Result<()> {
    let cli = Cli::try_parse_from(std::iter::once("cortex").chain(args.iter().copied()))?;
    let config = cli.load_config()?;
    run(cli, config).await
}

#[tokio::test]
async fn test_version_succeeds() {
    cortex(&["version"]).await.unwrap();
}

#[tokio::test]
async fn test_unknown_command_fails() {
    assert!(cortex(&["nonexistent-command"]).await.is_err());
}

#[tokio::test]
async fn test_config_init_then_validate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cortex.json5");
    let path = path.to_str().unwrap();

    cortex(&["--config", path, "config", "init"]).await.unwrap();
    cortex(&["--config", path, "config", "validate"]).await.unwrap();

    // A second init without --force refuses to clobber the file.
    assert!(cortex(&["--config", path, "config", "init"]).await.is_err());
    cortex(&["--config", path, "config", "init", "--force"]).await.unwrap();
}

#[tokio::test]
async fn test_config_validate_reports_bad_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cortex.json5");
    std::fs::write(&path, "{ upstream: { url: 'http://not-a-websocket' } }").unwrap();

    let result = cortex(&["--config", path.to_str().unwrap(), "config", "validate"]).await;
    let message = result.unwrap_err().to_string();
    assert!(message.contains("Configuration error"), "{}", message);
}

#[tokio::test]
async fn test_config_get_unknown_key_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.json5");
    let path = path.to_str().unwrap();

    cortex(&["--config", path, "config", "get", "gateway.port"]).await.unwrap();
    assert!(cortex(&["--config", path, "config", "get", "gateway.nope"]).await.is_err());
}

#[tokio::test]
async fn test_gateway_status_without_server_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cortex.json5");
    // Port 1 is privileged and never serving a gateway in tests.
    std::fs::write(&path, "{ gateway: { port: 1 } }").unwrap();

    cortex(&["--config", path.to_str().unwrap(), "gateway", "status"]).await.unwrap();
}

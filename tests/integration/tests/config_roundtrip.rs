//! Config save/load roundtrip integration tests.

use cortex_core::config::{BindMode, Config, ConfigBuilder, CorrelationMode};
use cortex_gateway::GatewayConfig;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_config_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cortex.json5");

    let config = Config::default();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.gateway.port, config.gateway.port);
    assert_eq!(loaded.gateway.bind, config.gateway.bind);
    assert_eq!(loaded.upstream.url, config.upstream.url);
    assert_eq!(loaded.upstream.backoff.initial_ms, config.upstream.backoff.initial_ms);
    assert_eq!(loaded.upstream.backoff.multiplier, config.upstream.backoff.multiplier);
    assert_eq!(loaded.scripts.interpreter, config.scripts.interpreter);
}

#[test]
fn test_config_modify_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cortex.json5");

    let config = ConfigBuilder::new()
        .port(9090)
        .bind(BindMode::Lan)
        .upstream_url("ws://engine.local:8765")
        .correlation(CorrelationMode::Ordered)
        .query_timeout_secs(30)
        .build();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.gateway.port, 9090);
    assert_eq!(loaded.gateway.bind, BindMode::Lan);
    assert_eq!(loaded.upstream.url, "ws://engine.local:8765");
    assert_eq!(loaded.upstream.correlation, CorrelationMode::Ordered);
    assert_eq!(loaded.upstream.query_timeout_secs, 30);
}

#[test]
fn test_handwritten_json5_feeds_gateway_config() {
    let config = Config::parse(
        r#"{
            // comments and trailing commas are fine
            gateway: { port: 6001, max_connections: 8, },
            upstream: { correlation: 'ordered', backoff: { multiplier: 1 } },
        }"#,
    )
    .unwrap();
    config.validate().unwrap();

    let gateway = GatewayConfig::from(&config);
    assert_eq!(gateway.port, 6001);
    assert_eq!(gateway.max_connections, 8);
    assert_eq!(gateway.upstream.correlation, CorrelationMode::Ordered);
    assert_eq!(gateway.upstream.backoff.multiplier, 1.0);
    assert_eq!(gateway.upstream.url, "ws://localhost:8765");
}

#[test]
fn test_config_load_nonexistent() {
    let result = Config::load(Path::new("/nonexistent/cortex.json5"));
    assert!(result.is_err());
}

#[test]
fn test_config_parse_invalid() {
    let result = Config::parse("not valid json");
    assert!(result.is_err());
}

//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Main Cortex configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Client-facing gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Upstream conversational engine settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// External script endpoints.
    #[serde(default)]
    pub scripts: ScriptsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gateway configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind mode.
    #[serde(default)]
    pub bind: BindMode,

    /// Port number.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS for browser clients.
    #[serde(default = "default_true")]
    pub cors: bool,

    /// Maximum concurrent client sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: BindMode::default(),
            port: default_port(),
            cors: true,
            max_connections: default_max_connections(),
        }
    }
}

fn default_port() -> u16 {
    5001
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> usize {
    100
}

/// Bind mode for the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    /// Bind to loopback only (127.0.0.1).
    #[default]
    Loopback,

    /// Bind to all interfaces.
    Lan,
}

impl FromStr for BindMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loopback" => Ok(Self::Loopback),
            "lan" => Ok(Self::Lan),
            other => Err(format!("Invalid bind mode: {} (expected loopback or lan)", other)),
        }
    }
}

/// Upstream engine configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// WebSocket URL of the conversational engine.
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// How replies are matched to queries.
    #[serde(default)]
    pub correlation: CorrelationMode,

    /// Seconds a query may stay unanswered before it fails. 0 disables expiry.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Reconnect backoff policy.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            correlation: CorrelationMode::default(),
            query_timeout_secs: default_query_timeout(),
            backoff: BackoffConfig::default(),
        }
    }
}

fn default_upstream_url() -> String {
    "ws://localhost:8765".to_string()
}

fn default_query_timeout() -> u64 {
    120
}

/// Reply correlation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMode {
    /// The engine echoes the `id` of each query on its reply.
    #[default]
    Echo,

    /// The engine answers in submission order; untagged replies resolve the
    /// oldest pending query.
    Ordered,
}

/// Capped exponential backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,

    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,

    /// Growth factor applied after each failed attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Random spread applied to each delay, as a fraction (0.2 = ±20%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_initial_ms() -> u64 {
    500
}

fn default_max_ms() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

/// Script endpoint configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Interpreter used to run the scripts.
    #[serde(default = "default_interpreter")]
    pub interpreter: PathBuf,

    /// Directory holding the scripts; also the child's working directory.
    #[serde(default = "default_backend_dir")]
    pub backend_dir: PathBuf,

    /// Face registration script, relative to `backend_dir`.
    #[serde(default = "default_register_script")]
    pub register_script: String,

    /// Face recognition script, relative to `backend_dir`.
    #[serde(default = "default_recognize_script")]
    pub recognize_script: String,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            backend_dir: default_backend_dir(),
            register_script: default_register_script(),
            recognize_script: default_recognize_script(),
        }
    }
}

fn default_interpreter() -> PathBuf {
    PathBuf::from("python3")
}

fn default_backend_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_register_script() -> String {
    "register.py".to_string()
}

fn default_recognize_script() -> String {
    "recognize.py".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Emit JSON-formatted log lines.
    #[serde(default)]
    pub json: bool,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

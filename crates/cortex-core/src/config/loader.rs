//! Configuration loading and persistence.

use super::{BackoffConfig, BindMode, Config, CorrelationMode, LogLevel};
use crate::env;
use crate::error::ConfigError;
use crate::paths;
use std::fs;
use std::path::{Path, PathBuf};

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::config_file()?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 has no serializer; plain JSON is valid JSON5
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.gateway.port == 0 {
            errors.push("Gateway port cannot be 0".to_string());
        }
        if self.gateway.max_connections == 0 {
            errors.push("Gateway max_connections must be greater than 0".to_string());
        }

        let url = self.upstream.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            errors.push(format!(
                "Upstream url '{}' must use the ws:// or wss:// scheme",
                url
            ));
        }

        let backoff = &self.upstream.backoff;
        if backoff.initial_ms == 0 {
            errors.push("Backoff initial_ms must be greater than 0".to_string());
        }
        if backoff.max_ms < backoff.initial_ms {
            errors.push(format!(
                "Backoff max_ms ({}) is below initial_ms ({})",
                backoff.max_ms, backoff.initial_ms
            ));
        }
        if !(backoff.multiplier >= 1.0) {
            errors.push(format!(
                "Backoff multiplier must be at least 1.0, got {}",
                backoff.multiplier
            ));
        }
        if !(0.0..1.0).contains(&backoff.jitter) {
            errors.push(format!(
                "Backoff jitter must be in [0, 1), got {}",
                backoff.jitter
            ));
        }

        if self.scripts.register_script.trim().is_empty() {
            errors.push("Scripts register_script must not be empty".to_string());
        }
        if self.scripts.recognize_script.trim().is_empty() {
            errors.push("Scripts recognize_script must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }

    /// Load configuration from `path` (or the default path when `None`),
    /// falling back to defaults if no file exists. Environment overrides are
    /// applied on top either way.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let loaded = match path {
            Some(p) => Self::load(p),
            None => Self::load_default(),
        };

        let mut config = match loaded {
            Ok(config) => config,
            Err(ConfigError::NotFound(p)) => {
                tracing::debug!("No config file at {}, using defaults", p.display());
                Self::default()
            }
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `CORTEX_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env::get_u16(env::vars::CORTEX_PORT) {
            self.gateway.port = port;
        }
        if let Some(url) = env::get_var(env::vars::CORTEX_UPSTREAM_URL) {
            self.upstream.url = url;
        }
        if let Some(python) = env::get_var(env::vars::CORTEX_PYTHON) {
            self.scripts.interpreter = PathBuf::from(python);
        }
        if let Some(dir) = env::get_var(env::vars::CORTEX_BACKEND_DIR) {
            self.scripts.backend_dir = paths::expand_tilde(&dir);
        }
    }
}

/// Builder for assembling a [`Config`] in code.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gateway port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.gateway.port = port;
        self
    }

    /// Set the bind mode.
    pub fn bind(mut self, mode: BindMode) -> Self {
        self.config.gateway.bind = mode;
        self
    }

    /// Set the upstream engine URL.
    pub fn upstream_url(mut self, url: impl Into<String>) -> Self {
        self.config.upstream.url = url.into();
        self
    }

    /// Set the correlation mode.
    pub fn correlation(mut self, mode: CorrelationMode) -> Self {
        self.config.upstream.correlation = mode;
        self
    }

    /// Set the query timeout in seconds.
    pub fn query_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upstream.query_timeout_secs = secs;
        self
    }

    /// Set the reconnect backoff policy.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.upstream.backoff = backoff;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build the config.
    pub fn build(self) -> Config {
        self.config
    }
}

//! Environment variable handling.

use std::env;
use std::path::Path;

/// Get an environment variable, returning None if not set or empty.
pub fn get_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable as a u16 (e.g., for ports).
pub fn get_u16(name: &str) -> Option<u16> {
    get_var(name).and_then(|v| v.parse().ok())
}

/// Load environment variables from a `.env` file in the working directory.
pub fn load_dotenv() -> Result<(), std::io::Error> {
    load_dotenv_from(Path::new(".env"))
}

/// Load environment variables from the given file. Variables that are
/// already set are left untouched.
pub fn load_dotenv_from(path: &Path) -> Result<(), std::io::Error> {
    if !path.exists() {
        return Ok(());
    }

    let content = std::fs::read_to_string(path)?;
    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim();

            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);

            if env::var(key).is_err() {
                env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// Environment variable names understood by Cortex.
pub mod vars {
    /// Cortex home directory override.
    pub const CORTEX_HOME: &str = "CORTEX_HOME";

    /// Cortex config file override.
    pub const CORTEX_CONFIG: &str = "CORTEX_CONFIG";

    /// Gateway listen port.
    pub const CORTEX_PORT: &str = "CORTEX_PORT";

    /// Upstream engine WebSocket URL.
    pub const CORTEX_UPSTREAM_URL: &str = "CORTEX_UPSTREAM_URL";

    /// Interpreter used for the script endpoints.
    pub const CORTEX_PYTHON: &str = "CORTEX_PYTHON";

    /// Directory holding the recognition scripts.
    pub const CORTEX_BACKEND_DIR: &str = "CORTEX_BACKEND_DIR";
}

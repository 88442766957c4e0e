//! External script endpoints.
//!
//! `POST /api/register` and `GET /api/recognize` each run one script with the
//! configured interpreter, wait for it to exit, and report its output.

use crate::error::GatewayError;
use crate::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use cortex_core::config::ScriptsConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Captured result of a finished script.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn code_text(&self) -> String {
        self.code
            .map_or_else(|| "unknown".to_string(), |code| code.to_string())
    }
}

/// Runs scripts from the configured backend directory.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    config: ScriptsConfig,
}

impl ScriptRunner {
    pub fn new(config: ScriptsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScriptsConfig {
        &self.config
    }

    /// Run `script` with `args` and wait for it to exit.
    pub async fn run(&self, script: &str, args: &[&str]) -> Result<ScriptOutput> {
        let path = self.config.backend_dir.join(script);
        info!("Running {} {}", path.display(), args.join(" "));

        let output = Command::new(&self.config.interpreter)
            .arg(&path)
            .args(args)
            .current_dir(&self.config.backend_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| GatewayError::Script {
                script: script.to_string(),
                source,
            })?;

        let result = ScriptOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.stdout.is_empty() {
            debug!("{} stdout: {}", script, result.stdout.trim_end());
        }
        if !result.stderr.is_empty() {
            debug!("{} stderr: {}", script, result.stderr.trim_end());
        }
        Ok(result)
    }
}

/// Routes for the script endpoints.
pub fn router(runner: ScriptRunner) -> Router {
    Router::new()
        .route("/api/register", post(register_handler))
        .route("/api/recognize", get(recognize_handler))
        .with_state(Arc::new(runner))
}

#[derive(Debug, Default, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    name: Option<String>,
}

type JsonResponse = (StatusCode, Json<Value>);

fn error_response(status: StatusCode, message: String) -> JsonResponse {
    (status, Json(json!({ "error": message })))
}

async fn register_handler(State(runner): State<Arc<ScriptRunner>>, body: Bytes) -> JsonResponse {
    let request: RegisterRequest = serde_json::from_slice(&body).unwrap_or_default();
    let name = match request.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return error_response(StatusCode::BAD_REQUEST, "Name is required".to_string()),
    };

    let script = runner.config.register_script.clone();
    match runner.run(&script, &[&name]).await {
        Ok(output) if output.success() => (
            StatusCode::OK,
            Json(json!({
                "message": format!("Face registered for {}", name),
                "output": output.stdout,
            })),
        ),
        Ok(output) => {
            warn!("Registration for {} exited with code {}", name, output.code_text());
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "Registration failed with code {}: {}",
                    output.code_text(),
                    output.stderr
                ),
            )
        }
        Err(e) => {
            warn!("Registration spawn failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Registration failed: {}", spawn_error_text(&e)),
            )
        }
    }
}

async fn recognize_handler(State(runner): State<Arc<ScriptRunner>>) -> JsonResponse {
    let script = runner.config.recognize_script.clone();
    match runner.run(&script, &[]).await {
        Ok(output) if output.success() => (
            StatusCode::OK,
            Json(json!({
                "message": "Recognition started",
                "output": output.stdout,
            })),
        ),
        Ok(output) => {
            warn!("Recognition exited with code {}", output.code_text());
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "Recognition failed with code {}: {}",
                    output.code_text(),
                    output.stderr
                ),
            )
        }
        Err(e) => {
            warn!("Recognition spawn failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Recognition failed: {}", spawn_error_text(&e)),
            )
        }
    }
}

fn spawn_error_text(err: &GatewayError) -> String {
    match err {
        GatewayError::Script { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}

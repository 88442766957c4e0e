//! WebSocket gateway server.

use crate::correlator::Correlator;
use crate::error::GatewayError;
use crate::protocol::ClientReply;
use crate::scripts::{self, ScriptRunner};
use crate::session::SessionManager;
use crate::upstream::{LinkState, UpstreamLink};
use crate::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use cortex_core::config::{BindMode, Config, ScriptsConfig, UpstreamConfig};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Origins accepted on a loopback bind (any port).
const LOOPBACK_ORIGINS: &[&str] = &["http://localhost", "http://127.0.0.1"];

/// Runtime configuration for a [`Gateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind mode.
    pub bind: BindMode,

    /// Port number; 0 picks an ephemeral port.
    pub port: u16,

    /// Enable CORS.
    pub cors: bool,

    /// Maximum concurrent client sessions.
    pub max_connections: usize,

    /// Upstream engine settings.
    pub upstream: UpstreamConfig,

    /// Script endpoint settings.
    pub scripts: ScriptsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for GatewayConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind: config.gateway.bind,
            port: config.gateway.port,
            cors: config.gateway.cors,
            max_connections: config.gateway.max_connections,
            upstream: config.upstream.clone(),
            scripts: config.scripts.clone(),
        }
    }
}

/// Gateway server state.
pub struct GatewayState {
    /// Live client sessions.
    pub sessions: Arc<SessionManager>,

    /// The upstream link.
    pub link: Arc<UpstreamLink>,

    /// Configuration.
    pub config: GatewayConfig,

    /// One permit per client connection, up to `max_connections`.
    connection_slots: Arc<Semaphore>,
}

impl GatewayState {
    /// Reserve a client slot for the lifetime of one connection.
    fn reserve_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.connection_slots.clone().try_acquire_owned().ok()
    }
}

/// The chat relay gateway.
pub struct Gateway {
    state: Arc<GatewayState>,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl Gateway {
    /// Create a new gateway. Nothing runs until [`run`](Self::run) or
    /// [`listen`](Self::listen).
    pub fn new(config: GatewayConfig) -> Self {
        let link = Arc::new(UpstreamLink::new(
            config.upstream.url.clone(),
            config.upstream.backoff.clone(),
        ));
        let correlator = Arc::new(Correlator::new(link.clone(), config.upstream.correlation));
        let sessions = Arc::new(SessionManager::new(correlator));
        let connection_slots = Arc::new(Semaphore::new(
            config.max_connections.min(Semaphore::MAX_PERMITS),
        ));

        Self {
            state: Arc::new(GatewayState {
                sessions,
                link,
                config,
                connection_slots,
            }),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Shared state.
    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Current upstream link state.
    pub fn link_state(&self) -> LinkState {
        self.state.link.state()
    }

    /// Watch upstream link state transitions.
    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.state.link.subscribe()
    }

    /// Get connected client count.
    pub async fn client_count(&self) -> usize {
        self.state.sessions.count().await
    }

    /// Number of queries awaiting an upstream reply.
    pub fn pending_count(&self) -> usize {
        self.state.sessions.correlator().pending_count()
    }

    /// Stop the upstream link, the sweeper, and the HTTP server.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run the gateway server until Ctrl-C or [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<()> {
        let addr = self.bind_address();

        if self.state.config.bind != BindMode::Loopback {
            warn!("Gateway binding to {}: reachable from the network without authentication", addr);
        }

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(GatewayError::Io)?;
        info!("Starting gateway server on {}", listener.local_addr()?);

        self.start_background();

        let shutdown = self.shutdown.clone();
        let result = axum::serve(
            listener,
            self.create_router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
            }
        })
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()));

        self.shutdown.cancel();
        result
    }

    /// Bind and serve in the background. Returns the bound address and the
    /// server task; the server stops on [`shutdown`](Self::shutdown).
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.bind_address()).await?;
        let addr = listener.local_addr()?;
        info!("Starting gateway server on {}", addr);

        self.start_background();

        let app = self
            .create_router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!("Gateway server failed: {}", e);
            }
        });

        Ok((addr, handle))
    }

    /// Spawn the upstream link loop and the expiry sweeper, once.
    fn start_background(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let link = self.state.link.clone();
        info!("Upstream engine: {}", link.url());
        tokio::spawn(link.run(self.state.sessions.clone(), self.shutdown.clone()));

        let timeout_secs = self.state.config.upstream.query_timeout_secs;
        if timeout_secs > 0 {
            tokio::spawn(sweep_loop(
                self.state.sessions.clone(),
                Duration::from_secs(timeout_secs),
                self.shutdown.clone(),
            ));
        }
    }

    /// Create the Axum router.
    pub fn create_router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
            .merge(scripts::router(ScriptRunner::new(
                self.state.config.scripts.clone(),
            )))
            .layer(TraceLayer::new_for_http());

        if self.state.config.cors {
            router = router.layer(Self::create_cors_layer(&self.state.config));
        }

        router
    }

    fn create_cors_layer(config: &GatewayConfig) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
            .max_age(Duration::from_secs(3600));

        match config.bind {
            BindMode::Loopback => layer.allow_origin(AllowOrigin::predicate(
                |origin: &HeaderValue, _| is_loopback_origin(origin),
            )),
            BindMode::Lan => layer.allow_origin(Any),
        }
    }

    /// Get the bind address.
    fn bind_address(&self) -> SocketAddr {
        let ip = match self.state.config.bind {
            BindMode::Loopback => [127, 0, 0, 1],
            BindMode::Lan => [0, 0, 0, 0],
        };

        SocketAddr::from((ip, self.state.config.port))
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn is_loopback_origin(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    LOOPBACK_ORIGINS.iter().any(|allowed| {
        origin
            .strip_prefix(allowed)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
    })
}

/// Periodically fail queries older than `timeout`.
async fn sweep_loop(sessions: Arc<SessionManager>, timeout: Duration, shutdown: CancellationToken) {
    let period = (timeout / 4).clamp(Duration::from_millis(50), Duration::from_secs(5));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                sessions.sweep_expired(timeout);
            }
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> std::result::Result<impl IntoResponse, StatusCode> {
    let Some(slot) = state.reserve_slot() else {
        warn!(
            "Max connections ({}) reached, rejecting {}",
            state.config.max_connections, addr
        );
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, addr, slot)))
}

/// Handle one client connection for its whole lifetime.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<GatewayState>,
    remote_addr: SocketAddr,
    slot: OwnedSemaphorePermit,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientReply>();
    let session = state.sessions.open(tx, Some(remote_addr)).await;
    let session_id = session.id().to_string();

    let (mut sender, mut receiver) = socket.split();

    let writer_id = session_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            if let Err(e) = sender.send(Message::Text(reply.to_json())).await {
                debug!("Failed to write to client {}: {}", writer_id, e);
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = state.sessions.handle_query(&session, &text) {
                    debug!("Query from {} rejected: {}", session_id, e);
                }
            }
            Ok(Message::Close(_)) => {
                debug!("Client {} closed connection", session_id);
                break;
            }
            Ok(Message::Binary(_)) => {
                debug!("Ignoring binary frame from {}", session_id);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error from {}: {}", session_id, e);
                break;
            }
        }
    }

    state.sessions.close(&session_id).await;
    drop(session);
    send_task.abort();
    drop(slot);
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let sessions = state.sessions.count().await;
    Json(serde_json::json!({
        "status": "ok",
        "upstream": state.link.state(),
        "sessions": sessions,
        "pending": state.sessions.correlator().pending_count(),
    }))
}

//! Shared harness for the relay integration tests.
//!
//! [`FakeEngine`] is a scripted stand-in for the upstream conversational
//! engine. [`TestGateway`] boots a gateway on an ephemeral port and
//! [`Client`] drives it the way the browser UI does.

use cortex_core::config::{BackoffConfig, CorrelationMode, UpstreamConfig};
use cortex_gateway::{Gateway, GatewayConfig, LinkState};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};

/// Upper bound on any single wait in the tests.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// How the fake engine answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Only answers when the test tells it to.
    Manual,
    /// Answers every query at once with `echo: <query>`, echoing the id.
    Echo,
}

/// A query as the engine received it.
#[derive(Debug, Clone)]
pub struct EngineQuery {
    pub id: Option<u64>,
    pub query: String,
}

enum EngineCommand {
    Frame(String),
    Disconnect,
}

/// Scripted upstream engine. Serves one connection at a time and accepts the
/// next one after a disconnect.
pub struct FakeEngine {
    addr: SocketAddr,
    queries: mpsc::UnboundedReceiver<EngineQuery>,
    commands: mpsc::UnboundedSender<EngineCommand>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeEngine {
    pub async fn start(mode: EngineMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (query_tx, queries) = mpsc::unbounded_channel();
        let (commands, mut command_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = connections.clone();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = accept_async(stream).await else {
                    continue;
                };
                accepted.fetch_add(1, Ordering::SeqCst);

                loop {
                    tokio::select! {
                        frame = ws.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let query = parse_query(&text);
                                if mode == EngineMode::Echo {
                                    let reply = json!({
                                        "id": query.id,
                                        "answer": format!("echo: {}", query.query),
                                    });
                                    let _ = ws.send(Message::Text(reply.to_string())).await;
                                }
                                let _ = query_tx.send(query);
                            }
                            Some(Ok(_)) => {}
                            Some(Err(_)) | None => break,
                        },
                        command = command_rx.recv() => match command {
                            Some(EngineCommand::Frame(text)) => {
                                let _ = ws.send(Message::Text(text)).await;
                            }
                            Some(EngineCommand::Disconnect) => {
                                let _ = ws.close(None).await;
                                break;
                            }
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            addr,
            queries,
            commands,
            connections,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of upstream connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Next query the gateway forwarded.
    pub async fn next_query(&mut self) -> EngineQuery {
        timeout(TIMEOUT, self.queries.recv())
            .await
            .expect("engine did not receive a query in time")
            .expect("engine task stopped")
    }

    /// Assert that no query arrives within `window`.
    pub async fn expect_no_query(&mut self, window: Duration) {
        if let Ok(Some(query)) = timeout(window, self.queries.recv()).await {
            panic!("unexpected query reached the engine: {:?}", query);
        }
    }

    pub fn reply(&self, id: u64, answer: &str) {
        self.send_raw(json!({ "id": id, "answer": answer }).to_string());
    }

    pub fn reply_error(&self, id: u64, error: &str) {
        self.send_raw(json!({ "id": id, "error": error }).to_string());
    }

    /// Reply without an id, as an engine that answers in order does.
    pub fn reply_untagged(&self, answer: &str) {
        self.send_raw(json!({ "answer": answer }).to_string());
    }

    pub fn send_raw(&self, text: impl Into<String>) {
        let _ = self.commands.send(EngineCommand::Frame(text.into()));
    }

    /// Close the current upstream connection; the engine keeps listening.
    pub fn disconnect(&self) {
        let _ = self.commands.send(EngineCommand::Disconnect);
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn parse_query(text: &str) -> EngineQuery {
    let value: Value = serde_json::from_str(text).expect("gateway sent invalid JSON upstream");
    EngineQuery {
        id: value["id"].as_u64(),
        query: value["query"].as_str().unwrap_or_default().to_string(),
    }
}

/// Upstream settings with fast reconnects for tests.
pub fn fast_upstream(url: impl Into<String>, correlation: CorrelationMode) -> UpstreamConfig {
    UpstreamConfig {
        url: url.into(),
        correlation,
        query_timeout_secs: 120,
        backoff: BackoffConfig {
            initial_ms: 20,
            max_ms: 200,
            multiplier: 2.0,
            jitter: 0.0,
        },
    }
}

/// A URL nothing is listening on.
pub async fn dead_upstream_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

/// A gateway listening on an ephemeral loopback port.
pub struct TestGateway {
    pub gateway: Gateway,
    pub addr: SocketAddr,
}

impl TestGateway {
    pub async fn start(upstream: UpstreamConfig) -> Self {
        Self::start_with(GatewayConfig {
            port: 0,
            upstream,
            ..Default::default()
        })
        .await
    }

    pub async fn start_with(config: GatewayConfig) -> Self {
        let gateway = Gateway::new(config);
        let (addr, _handle) = gateway.listen().await.unwrap();
        Self { gateway, addr }
    }

    /// Client WebSocket URL at `path` (`/` or `/ws`).
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Wait until the upstream link is in `state`.
    pub async fn wait_for_link(&self, state: LinkState) {
        let mut rx = self.gateway.subscribe_link();
        timeout(TIMEOUT, async {
            while *rx.borrow_and_update() != state {
                rx.changed().await.expect("link dropped");
            }
        })
        .await
        .unwrap_or_else(|_| panic!("link never reached {:?}", state));
    }

    /// Wait until the gateway holds `expected` live sessions.
    pub async fn wait_for_sessions(&self, expected: usize) {
        timeout(TIMEOUT, async {
            while self.gateway.client_count().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session count never reached {}", expected));
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.gateway.shutdown();
    }
}

/// A browser-like client connection.
pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = timeout(TIMEOUT, connect_async(url))
            .await
            .expect("connect timed out")
            .expect("connect failed");
        Self { ws }
    }

    pub async fn ask(&mut self, query: &str) {
        self.ws
            .send(Message::Text(query.to_string()))
            .await
            .expect("send failed");
    }

    /// Next JSON frame from the gateway.
    pub async fn recv(&mut self) -> Value {
        loop {
            let frame = timeout(TIMEOUT, self.ws.next())
                .await
                .expect("no frame from gateway in time")
                .expect("gateway closed the connection")
                .expect("websocket error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).expect("gateway sent invalid JSON");
            }
        }
    }

    /// Assert that no frame arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(Ok(Message::Text(text)))) = timeout(window, self.ws.next()).await {
            panic!("unexpected frame: {}", text);
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

pub fn message(text: &str) -> Value {
    json!({ "message": text })
}

pub fn error(text: impl std::fmt::Display) -> Value {
    json!({ "error": text.to_string() })
}

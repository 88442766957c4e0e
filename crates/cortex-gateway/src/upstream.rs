//! The single connection to the upstream conversational engine.
//!
//! [`UpstreamLink`] owns the connection state and the writer half of the
//! socket. Sessions never touch either directly: queries go out through
//! [`UpstreamSender::send`], and inbound replies are handed to an
//! [`UpstreamEvents`] sink. The link knows nothing about which client asked
//! what.

use crate::backoff::Backoff;
use crate::error::RelayError;
use crate::protocol::{self, QueryToken, UpstreamReply};
use cortex_core::config::BackoffConfig;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state of the upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Outbound half of the link, as seen by the correlator.
pub trait UpstreamSender: Send + Sync {
    /// Queue a query for the engine. Fails with [`RelayError::LinkUnavailable`]
    /// unless the link is connected; never drops a frame silently.
    fn send(&self, token: QueryToken, query: &str) -> Result<(), RelayError>;
}

/// Receiver of inbound link events.
pub trait UpstreamEvents: Send + Sync {
    /// A well-formed reply arrived.
    fn on_reply(&self, reply: UpstreamReply);

    /// An established connection was lost. Called after the link state has
    /// left `Connected`, so no new query can be accepted concurrently.
    fn on_disconnect(&self);
}

struct LinkInner {
    state: LinkState,
    writer: Option<mpsc::UnboundedSender<Message>>,
}

/// Owner of the upstream connection.
pub struct UpstreamLink {
    url: String,
    backoff: BackoffConfig,
    inner: Mutex<LinkInner>,
    state_tx: watch::Sender<LinkState>,
}

impl UpstreamLink {
    /// Create a disconnected link to `url`.
    pub fn new(url: impl Into<String>, backoff: BackoffConfig) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            url: url.into(),
            backoff,
            inner: Mutex::new(LinkInner {
                state: LinkState::Disconnected,
                writer: None,
            }),
            state_tx,
        }
    }

    /// Engine endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.inner.lock().state
    }

    /// Watch state transitions. A transition to `Connected` is the "ready"
    /// notification.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, inner: &mut LinkInner, state: LinkState) {
        if inner.state != state {
            debug!("Upstream link {} -> {}", inner.state.as_str(), state.as_str());
        }
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn mark_connecting(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, LinkState::Connecting);
    }

    fn mark_connected(&self, writer: mpsc::UnboundedSender<Message>) {
        let mut inner = self.inner.lock();
        inner.writer = Some(writer);
        self.transition(&mut inner, LinkState::Connected);
    }

    fn mark_disconnected(&self) {
        let mut inner = self.inner.lock();
        inner.writer = None;
        self.transition(&mut inner, LinkState::Disconnected);
    }

    /// Drive the connect / serve / reconnect cycle until `shutdown` fires.
    ///
    /// Disconnected -> Connecting -> Connected -> Disconnected, re-entered
    /// after a backoff delay. Connection failures never escape this loop.
    pub async fn run(self: Arc<Self>, events: Arc<dyn UpstreamEvents>, shutdown: CancellationToken) {
        let mut backoff = Backoff::new(&self.backoff);

        loop {
            self.mark_connecting();

            let attempt = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = connect_async(self.url.as_str()) => result,
            };

            match attempt {
                Ok((ws, _)) => {
                    backoff.reset();
                    info!("Upstream connected: {}", self.url);
                    self.serve(ws, events.as_ref(), &shutdown).await;
                    events.on_disconnect();
                    info!("Upstream disconnected: {}", self.url);
                    if shutdown.is_cancelled() {
                        break;
                    }
                }
                Err(e) => {
                    self.mark_disconnected();
                    warn!("Upstream connect to {} failed: {}", self.url, e);
                }
            }

            let delay = backoff.next_delay();
            info!(
                "Reconnecting to upstream in {}ms (attempt {})",
                delay.as_millis(),
                backoff.attempt()
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.mark_disconnected();
        debug!("Upstream link loop stopped");
    }

    /// Pump one established connection until it closes. Returns with the
    /// link already marked disconnected.
    async fn serve(&self, ws: WsStream, events: &dyn UpstreamEvents, shutdown: &CancellationToken) {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        // Single writer: every outbound frame for this connection goes through here.
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    warn!("Upstream write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        self.mark_connected(tx);

        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => match UpstreamReply::parse(&text) {
                    Ok(reply) => events.on_reply(reply),
                    Err(e) => warn!("Discarding upstream frame: {}", e),
                },
                Some(Ok(Message::Binary(bytes))) => {
                    warn!("Discarding binary upstream frame ({} bytes)", bytes.len());
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Upstream sent close: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Upstream read error: {}", e);
                    break;
                }
                None => break,
            }
        }

        self.mark_disconnected();
        writer.abort();
    }
}

impl UpstreamSender for UpstreamLink {
    fn send(&self, token: QueryToken, query: &str) -> Result<(), RelayError> {
        let inner = self.inner.lock();
        if inner.state != LinkState::Connected {
            return Err(RelayError::LinkUnavailable);
        }
        let writer = inner.writer.as_ref().ok_or(RelayError::LinkUnavailable)?;
        writer
            .send(Message::Text(protocol::encode_query(token, query)))
            .map_err(|_| RelayError::LinkUnavailable)
    }
}

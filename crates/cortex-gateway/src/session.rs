//! Client session management.

use crate::correlator::{Correlator, Resolution};
use crate::error::RelayError;
use crate::protocol::{ClientReply, QueryToken, UpstreamReply};
use crate::upstream::UpstreamEvents;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// One connected client.
#[derive(Debug)]
pub struct ClientSession {
    /// Session ID.
    id: String,

    /// Connection time.
    created_at: chrono::DateTime<chrono::Utc>,

    /// Remote address.
    remote_addr: Option<SocketAddr>,

    /// Token of the query awaiting a reply, if any.
    in_flight: Mutex<Option<QueryToken>>,

    /// Frames for this session's connection writer.
    outbound: mpsc::UnboundedSender<ClientReply>,
}

impl ClientSession {
    /// Create a session writing to `outbound`.
    pub fn new(outbound: mpsc::UnboundedSender<ClientReply>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            remote_addr,
            in_flight: Mutex::new(None),
            outbound,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Token of the query awaiting a reply, if any.
    pub fn in_flight(&self) -> Option<QueryToken> {
        *self.in_flight.lock()
    }

    /// Queue a frame for the connection. A closed connection is a no-op.
    fn push(&self, reply: ClientReply) -> bool {
        self.outbound.send(reply).is_ok()
    }
}

/// Registry of live sessions and the glue between them and the correlator.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<ClientSession>>>,
    correlator: Arc<Correlator>,
}

impl SessionManager {
    pub fn new(correlator: Arc<Correlator>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            correlator,
        }
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Create and register a session for a new connection.
    pub async fn open(
        &self,
        outbound: mpsc::UnboundedSender<ClientReply>,
        remote_addr: Option<SocketAddr>,
    ) -> Arc<ClientSession> {
        let session = Arc::new(ClientSession::new(outbound, remote_addr));
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session.clone());
        info!(
            "Client connected: {} from {}",
            session.id,
            remote_addr.map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        session
    }

    /// Unregister a session. Its pending query, if any, is left to resolve
    /// or fail on its own; the outcome is then discarded.
    pub async fn close(&self, id: &str) {
        let removed = self.sessions.write().await.remove(id);
        if let Some(session) = removed {
            match session.in_flight() {
                Some(token) => info!("Client disconnected: {} ({} still pending)", id, token),
                None => info!("Client disconnected: {}", id),
            }
        }
    }

    /// Get a session by ID.
    pub async fn get(&self, id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Get session count.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Handle one inbound text frame from `session` as a query.
    ///
    /// Any rejection is written to the session as an error frame and also
    /// returned.
    pub fn handle_query(&self, session: &Arc<ClientSession>, text: &str) -> Result<QueryToken, RelayError> {
        if text.trim().is_empty() {
            session.push(RelayError::EmptyQuery.into());
            return Err(RelayError::EmptyQuery);
        }

        // Held across submit so a fast reply cannot be delivered before the
        // token is recorded.
        let mut in_flight = session.in_flight.lock();
        if let Some(pending) = *in_flight {
            drop(in_flight);
            debug!(session = %session.id, %pending, "Rejecting query while one is in flight");
            session.push(RelayError::SessionBusy.into());
            return Err(RelayError::SessionBusy);
        }

        match self.correlator.submit(session, text) {
            Ok(token) => {
                *in_flight = Some(token);
                Ok(token)
            }
            Err(e) => {
                drop(in_flight);
                session.push(e.clone().into());
                Err(e)
            }
        }
    }

    /// Write a resolution to the session that owns it, if it is still around.
    pub fn deliver(&self, resolution: Resolution) {
        let Resolution {
            token,
            session,
            outcome,
        } = resolution;

        let Some(session) = session.upgrade() else {
            debug!(%token, "Dropping resolution: {}", RelayError::SessionClosed);
            return;
        };

        {
            let mut in_flight = session.in_flight.lock();
            if *in_flight == Some(token) {
                *in_flight = None;
            }
        }

        let reply = match outcome {
            Ok(answer) => ClientReply::message(answer),
            Err(e) => e.into(),
        };
        if !session.push(reply) {
            debug!(session = %session.id, %token, "Dropping resolution: {}", RelayError::SessionClosed);
        }
    }

    /// Fail queries that have waited at least `max_age`. Returns how many.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let expired = self.correlator.expire(max_age);
        let count = expired.len();
        if count > 0 {
            warn!("{} queries timed out after {:?}", count, max_age);
        }
        for resolution in expired {
            self.deliver(resolution);
        }
        count
    }
}

impl UpstreamEvents for SessionManager {
    fn on_reply(&self, reply: UpstreamReply) {
        match self.correlator.resolve(reply) {
            Ok(resolution) => self.deliver(resolution),
            Err(e) => warn!("Discarding upstream reply: {}", e),
        }
    }

    fn on_disconnect(&self) {
        let failed = self.correlator.fail_all(RelayError::LinkUnavailable);
        if !failed.is_empty() {
            warn!("Upstream lost with {} queries pending", failed.len());
        }
        for resolution in failed {
            self.deliver(resolution);
        }
    }
}

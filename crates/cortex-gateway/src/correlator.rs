//! Matching of upstream replies to the queries that caused them.
//!
//! Every forwarded query gets a fresh [`QueryToken`] and a [`PendingQuery`]
//! entry. Replies are matched by token, never by arrival order, unless the
//! correlator runs in [`CorrelationMode::Ordered`] and the reply carries no
//! token at all.
//!
//! In ordered mode the registry doubles as the engine's reply queue: a query
//! that times out keeps its slot, marked as timed out, until the engine's
//! reply for it arrives and is thrown away. Otherwise that late reply would
//! be taken as the answer to the next query in line.
//!
//! The registry and the token counter sit behind one lock. `submit` calls
//! into the upstream link while holding it, so a send and a concurrent
//! `fail_all` can never interleave.

use crate::error::RelayError;
use crate::protocol::{QueryToken, ReplyOutcome, UpstreamReply};
use crate::session::ClientSession;
use crate::upstream::UpstreamSender;
use cortex_core::config::CorrelationMode;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A query awaiting its upstream reply.
#[derive(Debug)]
pub struct PendingQuery {
    pub token: QueryToken,
    /// Owning session. Weak: a pending query does not keep its session alive.
    pub session: Weak<ClientSession>,
    pub submitted_at: Instant,
    /// Already failed with `Timeout`; only holds its place in the reply order.
    pub timed_out: bool,
}

/// A pending query taken out of the registry, ready for delivery.
#[derive(Debug)]
pub struct Resolution {
    pub token: QueryToken,
    pub session: Weak<ClientSession>,
    /// Answer text, or the reason the query failed.
    pub outcome: Result<String, RelayError>,
}

struct Registry {
    last_token: u64,
    // Ordered by token, so the first entry is always the oldest submission.
    pending: BTreeMap<QueryToken, PendingQuery>,
}

/// Tracks in-flight queries and matches replies to them.
pub struct Correlator {
    registry: Mutex<Registry>,
    link: Arc<dyn UpstreamSender>,
    mode: CorrelationMode,
}

impl Correlator {
    pub fn new(link: Arc<dyn UpstreamSender>, mode: CorrelationMode) -> Self {
        Self {
            registry: Mutex::new(Registry {
                last_token: 0,
                pending: BTreeMap::new(),
            }),
            link,
            mode,
        }
    }

    pub fn mode(&self) -> CorrelationMode {
        self.mode
    }

    /// Forward `query` upstream on behalf of `session`.
    ///
    /// If the link refuses the frame, no entry survives and the error is
    /// returned to the caller; no reply will ever arrive for it.
    pub fn submit(&self, session: &Arc<ClientSession>, query: &str) -> Result<QueryToken, RelayError> {
        let mut registry = self.registry.lock();
        registry.last_token += 1;
        let token = QueryToken::new(registry.last_token);

        registry.pending.insert(
            token,
            PendingQuery {
                token,
                session: Arc::downgrade(session),
                submitted_at: Instant::now(),
                timed_out: false,
            },
        );

        if let Err(e) = self.link.send(token, query) {
            registry.pending.remove(&token);
            debug!(session = %session.id(), "Query not forwarded: {}", e);
            return Err(e);
        }

        debug!(session = %session.id(), %token, "Query forwarded upstream");
        Ok(token)
    }

    /// Take the pending entry a reply belongs to.
    ///
    /// Unknown or already-resolved tokens yield [`RelayError::UnmatchedToken`],
    /// as does the late reply to a query that already timed out. An untagged
    /// reply in `echo` mode is [`RelayError::MalformedUpstreamFrame`].
    pub fn resolve(&self, reply: UpstreamReply) -> Result<Resolution, RelayError> {
        let mut registry = self.registry.lock();

        let token = match (reply.token, self.mode) {
            (Some(token), _) => token,
            (None, CorrelationMode::Ordered) => registry
                .pending
                .keys()
                .next()
                .copied()
                .ok_or_else(|| RelayError::UnmatchedToken("untagged reply".to_string()))?,
            (None, CorrelationMode::Echo) => {
                return Err(RelayError::MalformedUpstreamFrame(
                    "reply carries no id".to_string(),
                ))
            }
        };

        let entry = registry
            .pending
            .remove(&token)
            .ok_or_else(|| RelayError::UnmatchedToken(token.to_string()))?;

        if entry.timed_out {
            debug!(%token, "Late reply for a timed-out query");
            return Err(RelayError::UnmatchedToken(format!("{} (timed out)", token)));
        }

        let outcome = match reply.outcome {
            ReplyOutcome::Answer(text) => Ok(text),
            ReplyOutcome::Error(text) => Err(RelayError::Upstream(text)),
        };

        Ok(Resolution {
            token,
            session: entry.session,
            outcome,
        })
    }

    /// Remove every pending entry, failing each with `reason`. Entries that
    /// already timed out were reported then and are dropped silently.
    pub fn fail_all(&self, reason: RelayError) -> Vec<Resolution> {
        let drained = std::mem::take(&mut self.registry.lock().pending);
        drained
            .into_values()
            .filter(|entry| !entry.timed_out)
            .map(|entry| Resolution {
                token: entry.token,
                session: entry.session,
                outcome: Err(reason.clone()),
            })
            .collect()
    }

    /// Fail every entry that has waited at least `max_age` with
    /// [`RelayError::Timeout`].
    ///
    /// In `echo` mode the entries are removed. In `ordered` mode they stay
    /// queued as timed out, so the engine's eventual reply still lines up.
    pub fn expire(&self, max_age: Duration) -> Vec<Resolution> {
        let now = Instant::now();
        let mut registry = self.registry.lock();

        let stale: Vec<QueryToken> = registry
            .pending
            .values()
            .filter(|entry| !entry.timed_out)
            .filter(|entry| now.duration_since(entry.submitted_at) >= max_age)
            .map(|entry| entry.token)
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for token in stale {
            let session = match self.mode {
                CorrelationMode::Echo => registry.pending.remove(&token).map(|entry| entry.session),
                CorrelationMode::Ordered => registry.pending.get_mut(&token).map(|entry| {
                    entry.timed_out = true;
                    entry.session.clone()
                }),
            };
            if let Some(session) = session {
                expired.push(Resolution {
                    token,
                    session,
                    outcome: Err(RelayError::Timeout),
                });
            }
        }
        expired
    }

    /// Number of queries awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.registry
            .lock()
            .pending
            .values()
            .filter(|entry| !entry.timed_out)
            .count()
    }

    /// Whether `token` is still awaiting a reply.
    pub fn is_pending(&self, token: QueryToken) -> bool {
        self.registry
            .lock()
            .pending
            .get(&token)
            .is_some_and(|entry| !entry.timed_out)
    }
}

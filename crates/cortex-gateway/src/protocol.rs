//! Wire frames for the client channel and the upstream channel.
//!
//! Client channel: inbound frames are raw query text; outbound frames are
//! `{ "message": ... }` or `{ "error": ... }`.
//!
//! Upstream channel: outbound frames are `{ "id": <token>, "query": ... }`;
//! inbound frames are `{ "answer": ... }` or `{ "error": ... }`, carrying the
//! echoed `"id"` when the engine supports it.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation token attached to a query and expected back on its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryToken(u64);

impl QueryToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Frame written to a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientReply {
    /// Answer to the client's query.
    Message { message: String },
    /// Failure of the client's query.
    Error { error: String },
}

impl ClientReply {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message {
            message: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { error: text.into() }
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn to_json(&self) -> String {
        // Two string fields cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<RelayError> for ClientReply {
    fn from(err: RelayError) -> Self {
        Self::error(err.to_string())
    }
}

#[derive(Serialize)]
struct UpstreamQuery<'a> {
    id: QueryToken,
    query: &'a str,
}

/// Encode a query frame for the upstream engine.
pub fn encode_query(token: QueryToken, query: &str) -> String {
    serde_json::to_string(&UpstreamQuery { id: token, query }).unwrap_or_default()
}

/// What the engine said about a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Answer(String),
    Error(String),
}

/// A parsed upstream reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamReply {
    /// Echoed correlation token, if the engine supplied one.
    pub token: Option<QueryToken>,
    pub outcome: ReplyOutcome,
}

#[derive(Deserialize)]
struct RawReply {
    #[serde(default)]
    id: Option<QueryToken>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl UpstreamReply {
    pub fn answer(token: Option<QueryToken>, text: impl Into<String>) -> Self {
        Self {
            token,
            outcome: ReplyOutcome::Answer(text.into()),
        }
    }

    pub fn error(token: Option<QueryToken>, text: impl Into<String>) -> Self {
        Self {
            token,
            outcome: ReplyOutcome::Error(text.into()),
        }
    }

    /// Parse an inbound upstream text frame.
    ///
    /// Exactly one of `answer` and `error` must be present; anything else is
    /// [`RelayError::MalformedUpstreamFrame`].
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| RelayError::MalformedUpstreamFrame(e.to_string()))?;
        if !value.is_object() {
            return Err(RelayError::MalformedUpstreamFrame(
                "expected a JSON object".to_string(),
            ));
        }

        let raw: RawReply = serde_json::from_value(value)
            .map_err(|e| RelayError::MalformedUpstreamFrame(e.to_string()))?;

        let outcome = match (raw.answer, raw.error) {
            (Some(answer), None) => ReplyOutcome::Answer(answer),
            (None, Some(error)) => ReplyOutcome::Error(error),
            (Some(_), Some(_)) => {
                return Err(RelayError::MalformedUpstreamFrame(
                    "both answer and error present".to_string(),
                ))
            }
            (None, None) => {
                return Err(RelayError::MalformedUpstreamFrame(
                    "neither answer nor error present".to_string(),
                ))
            }
        };

        Ok(Self {
            token: raw.id,
            outcome,
        })
    }
}

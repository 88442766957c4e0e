//! Gateway error types.

use thiserror::Error;

/// Errors raised while running the gateway process.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external script could not be started.
    #[error("failed to run {script}: {source}")]
    Script {
        script: String,
        #[source]
        source: std::io::Error,
    },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors in the relay path between a client session and the upstream engine.
///
/// The `Display` text of the variants a client can observe is what ends up
/// in the `{ "error": ... }` frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Upstream not connected at send time, or dropped while a query was pending.
    #[error("upstream engine is unavailable")]
    LinkUnavailable,

    /// Upstream sent something that is not a reply.
    #[error("malformed upstream frame: {0}")]
    MalformedUpstreamFrame(String),

    /// Upstream reply matches no pending query.
    #[error("no pending query for {0}")]
    UnmatchedToken(String),

    /// The session already has a query in flight.
    #[error("a query is already in progress for this session")]
    SessionBusy,

    /// A resolution arrived after the client disconnected.
    #[error("client session is closed")]
    SessionClosed,

    /// The upstream engine did not answer in time.
    #[error("timed out waiting for the upstream engine")]
    Timeout,

    /// The client sent an empty query.
    #[error("query must not be empty")]
    EmptyQuery,

    /// The upstream engine answered with an error payload.
    #[error("{0}")]
    Upstream(String),
}

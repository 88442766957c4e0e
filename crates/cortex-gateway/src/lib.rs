//! Chat relay gateway.
//!
//! Many short-lived WebSocket client sessions share one long-lived
//! connection to an upstream conversational engine. This crate provides:
//! - The upstream link with reconnect and capped exponential backoff
//! - Token-based correlation of replies to the queries that caused them
//! - Client session management with one in-flight query per session
//! - The HTTP front: client WebSocket route, health, and script endpoints

pub mod backoff;
pub mod correlator;
pub mod error;
pub mod protocol;
pub mod scripts;
pub mod server;
pub mod session;
pub mod upstream;

pub use correlator::{Correlator, PendingQuery, Resolution};
pub use error::{GatewayError, RelayError};
pub use protocol::{ClientReply, QueryToken, ReplyOutcome, UpstreamReply};
pub use server::{Gateway, GatewayConfig};
pub use session::{ClientSession, SessionManager};
pub use upstream::{LinkState, UpstreamEvents, UpstreamLink, UpstreamSender};

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

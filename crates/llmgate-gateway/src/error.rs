//! Gateway error taxonomy
//!
//! - `ExchangeError`: credential exchange failures (fatal to a session during refresh)
//! - `SendError`: the subscriber side of a session is gone
//! - `BridgeError`: everything the live bridge reports to its callers
//!
//! Upstream provider failures are deliberately absent: the streaming proxy turns
//! them into in-band error events instead of errors.

use std::time::Duration;

/// Token exchange failures
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("invalid token exchange endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("failed to build token exchange client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("token exchange request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token exchange returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("token exchange response could not be decoded: {0}")]
    Decode(String),

    #[error("token exchange returned an empty token")]
    EmptyToken,

    #[error("token exchange timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure to push a message to a subscriber
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("subscriber disconnected")]
    Closed,
}

/// Errors reported by the live bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("stream already active: {0}")]
    StreamAlreadyActive(String),

    #[error("missing {header} header: on-behalf-of auth requires an ID token")]
    MissingIdToken { header: &'static str },

    #[error("access token for '{0}' expired before it could be refreshed")]
    TokenExpired(String),

    #[error("invalid message published to '{path}': {source}")]
    InvalidMessage {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("initial token exchange failed for '{path}': {source}")]
    InitialExchange {
        path: String,
        #[source]
        source: ExchangeError,
    },

    #[error("token refresh failed for '{path}': {source}")]
    TokenRefresh {
        path: String,
        #[source]
        source: ExchangeError,
    },

    #[error("failed to send response to '{path}': {source}")]
    Send {
        path: String,
        #[source]
        source: SendError,
    },

    #[error("session '{0}' cancelled")]
    Cancelled(String),

    #[error("live server is closed")]
    Closed,

    #[error("session task for '{path}' failed: {reason}")]
    Internal { path: String, reason: String },
}

impl BridgeError {
    /// Errors that only affect the immediate caller of a publish
    pub fn is_per_call(&self) -> bool {
        matches!(
            self,
            BridgeError::StreamNotFound(_)
                | BridgeError::MissingIdToken { .. }
                | BridgeError::TokenExpired(_)
                | BridgeError::InvalidMessage { .. }
                | BridgeError::Send { .. }
        )
    }
}

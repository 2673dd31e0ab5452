//! Short-lived access token
//!
//! Minted by the credential exchange, replaced (never appended) on every refresh,
//! discarded with its session. Expiry is tracked on the tokio clock so refresh
//! behaviour can be exercised with a paused runtime.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Lifetime requested from the exchange. Must stay below the server-side maximum
/// (which can be as low as 10 minutes).
pub const TOKEN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Refresh one minute before expiry
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Exchanged access token bound to a tenant namespace
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    /// Token minted now, valid for [`TOKEN_TIMEOUT`]
    pub fn new(value: impl Into<String>) -> Self {
        Self::with_lifetime(value, TOKEN_TIMEOUT)
    }

    pub fn with_lifetime(value: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(Instant::now() + lifetime),
        }
    }

    /// Placeholder used when the deployment does not exchange tokens
    pub fn empty() -> Self {
        Self {
            value: String::new(),
            expires_at: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() >= expires_at,
            None => false,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("len", &self.value.len())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

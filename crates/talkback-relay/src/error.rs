//! Errors surfaced by the relay.

use thiserror::Error;

/// Failures talking to the external queue store.
///
/// Callers decide whether to retry: the request path treats these as fatal
/// for that request, the inbox listener backs off and tries again.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("queue store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("queue entry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

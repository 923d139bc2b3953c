//! Broker error types.

use fir_core::FirError;
use thiserror::Error;

/// Errors from a [`Broker`](crate::Broker).
#[derive(Debug, Error)]
pub enum PubSubError {
    /// The broker could not be reached or rejected a command.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// A message could not be encoded or decoded.
    #[error("invalid broker message: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<redis::RedisError> for PubSubError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<PubSubError> for FirError {
    fn from(err: PubSubError) -> Self {
        FirError::transport(err.to_string())
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, PubSubError>;

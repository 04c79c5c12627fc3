//! Error types for the dispatch subsystem.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Main error type for the dispatch subsystem.
///
/// This enum covers scheduling, circuit-breaking, and cache failure scenarios
/// with enough context for callers to decide whether to retry.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// Configuration error (invalid settings, missing required fields)
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Provider call failure (timeouts, 5xx responses, transport faults)
    #[error("Provider error [{provider}]: {message}")]
    Provider {
        /// Provider the failing call was dispatched to
        provider: String,
        /// Error message describing the provider failure
        message: String,
        /// HTTP status code when the failure surfaced one
        status_code: Option<u16>,
    },

    /// Circuit breaker rejected the call before dispatch
    #[error("Circuit breaker open for provider {provider}")]
    CircuitOpen {
        /// Provider whose circuit is open
        provider: String,
        /// Remaining cooldown before the breaker admits a probe
        retry_after: Option<Duration>,
    },

    /// Durable cache tier could not be initialized or reached
    #[error("Cache unavailable: {message}")]
    CacheUnavailable {
        /// Error message describing the cache issue
        message: String,
    },

    /// Persisted cache entry failed to deserialize
    #[error("Cache corruption for key {key}: {message}")]
    CacheCorruption {
        /// Cache key whose persisted entry is corrupt
        key: String,
        /// Error message describing the corruption
        message: String,
    },

    /// Filesystem error (cache directory, warm sources)
    #[error("I/O error: {message}")]
    Io {
        /// Error message describing the I/O issue
        message: String,
    },

    /// Internal error (unexpected conditions, library bugs)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal issue
        message: String,
    },
}

impl DispatchError {
    /// Returns true if this error is retryable with exponential backoff.
    ///
    /// Only provider call failures are retryable by the queue. Circuit
    /// rejections carry their own cooldown and are surfaced immediately;
    /// configuration and cache errors never resolve by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Provider { .. })
    }

    /// Returns the retry-after duration if available.
    ///
    /// Circuit rejections report the remaining cooldown until the breaker
    /// admits a half-open probe.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DispatchError::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

// Conversions from common error types
impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Internal {
            message: format!("JSON serialization/deserialization error: {}", err),
        }
    }
}

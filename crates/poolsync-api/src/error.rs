//! Error types for the pool controller API client.

use thiserror::Error;

/// Errors that can occur when talking to the pool controller.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials were rejected, or a protected endpoint was called
    /// without credentials.
    #[error("authentication rejected: {message}")]
    Authentication {
        /// Device-reported reason, or the HTTP status when there was no body.
        message: String,
    },

    /// Transport-level failure from the HTTP stack (connection refused,
    /// DNS failure, broken socket).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The configured base URL or a derived endpoint URL is invalid.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The device did not answer within the per-request deadline.
    #[error("request timed out after {timeout_secs}s")]
    Timeout {
        /// Deadline that elapsed, in whole seconds.
        timeout_secs: u64,
    },

    /// TLS backend could not be initialised (bad CA bundle, unreadable
    /// certificate file).
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// The device acknowledged the request with an explicit error marker
    /// in the body.
    #[error("device rejected the request: {reason}")]
    DeviceRejected {
        /// Reason text exactly as the firmware reported it.
        reason: String,
    },

    /// The response body could not be parsed into the expected shape.
    #[error("malformed response body: {message}")]
    Deserialization {
        /// Parser diagnostic.
        message: String,
        /// Raw body, kept for debugging truncated or garbled payloads.
        body: String,
    },
}

impl Error {
    /// Whether this error is worth retrying for an idempotent read.
    ///
    /// Timeouts, connection-level failures and garbled bodies are all
    /// transient from a reader's point of view: repeating the request
    /// cannot change device state.
    #[must_use]
    pub fn is_transient_for_read(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::Deserialization { .. } => true,
            _ => false,
        }
    }

    /// Whether this error is worth retrying for a state-changing call.
    ///
    /// Only failures where the request provably never reached the device
    /// qualify. A timed-out write may already have been applied, so it is
    /// surfaced to the caller instead of being resent.
    #[must_use]
    pub fn is_transient_for_write(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_connect())
    }

    /// True for authentication failures, which are never retried.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// The device's own reason text, when it reported one.
    #[must_use]
    pub fn device_reason(&self) -> Option<&str> {
        match self {
            Self::DeviceRejected { reason } => Some(reason),
            Self::Authentication { message } => Some(message),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

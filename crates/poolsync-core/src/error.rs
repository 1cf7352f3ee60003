// ── Core error types ──
//
// User-facing errors from poolsync-core. These are NOT wire-specific --
// consumers never see HTTP plumbing or JSON parse failures directly.
// The `From<poolsync_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach device at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Device request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Coordinator is not running")]
    NotRunning,

    #[error("Coordinator is already running")]
    AlreadyStarted,

    // ── Command validation errors ────────────────────────────────────
    #[error("Unknown function key: {key}")]
    UnsupportedDevice { key: String },

    #[error("Action {action} is not supported by {key}")]
    UnsupportedAction { key: String, action: String },

    #[error("Target {target} value {value} is outside the safe range {min}..={max}")]
    TargetOutOfRange {
        target: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Manual dosing is disabled: refusing to drive {key}")]
    DosingNotPermitted { key: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Device rejected the request: {reason}")]
    DeviceRejected { reason: String },

    #[error("Device sent a malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("No usable snapshot: device unreachable for {failures} consecutive polls")]
    StaleData { failures: u32 },

    #[error("Device API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// True for errors caused by the caller's input rather than the
    /// device or the network.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedDevice { .. }
                | Self::UnsupportedAction { .. }
                | Self::TargetOutOfRange { .. }
                | Self::DosingNotPermitted { .. }
                | Self::ValidationFailed { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<poolsync_api::Error> for CoreError {
    fn from(err: poolsync_api::Error) -> Self {
        match err {
            poolsync_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            poolsync_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map(|u| u.to_string())
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            poolsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            poolsync_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            poolsync_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS setup failed: {msg}"),
            },
            poolsync_api::Error::DeviceRejected { reason } => CoreError::DeviceRejected { reason },
            poolsync_api::Error::Deserialization { message, body: _ } => {
                CoreError::MalformedResponse { message }
            }
        }
    }
}

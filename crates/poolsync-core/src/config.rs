// ── Runtime connection configuration ──
//
// These types describe *how* to talk to one pool controller. They carry
// credential data and connection tuning, but never touch disk; the
// profile layer (poolsync-config) constructs a `DeviceConfig` and hands
// it in.

use std::time::Duration;

use poolsync_api::RetryConfig;
use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

/// HTTP Basic credentials for protected endpoints.
#[derive(Debug, Clone)]
pub struct DeviceCredentials {
    pub username: String,
    pub password: SecretString,
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict). Default: most devices sit on plain
    /// HTTP, and those that do use TLS behind a reverse proxy have a
    /// real certificate.
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed device certs).
    DangerAcceptInvalid,
}

/// Configuration for one device connection.
///
/// Built by the embedding application, passed to `DeviceCoordinator` --
/// core never reads config files.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device root URL (e.g., `http://192.168.1.50`).
    pub url: Url,
    /// Credentials for write endpoints; `None` for read-only use.
    pub credentials: Option<DeviceCredentials>,
    /// TLS verification strategy for HTTPS URLs.
    pub tls: TlsVerification,
    /// Per-request deadline.
    pub timeout: Duration,
    /// Delay between full-state polls.
    pub poll_interval: Duration,
    /// Sustained request rate the device is allowed to see, per second.
    pub rate_limit_per_sec: f64,
    /// Burst ceiling of the shared token bucket.
    pub rate_burst: u32,
    /// Retry tuning for transient transport failures.
    pub retry: RetryConfig,
    /// Whether manual dosing commands are allowed at all. Off by
    /// default: a stuck automation loop must not be able to pump acid.
    pub permit_manual_dosing: bool,
}

impl DeviceConfig {
    /// Config with conservative defaults for the given device URL.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            credentials: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            rate_limit_per_sec: 2.0,
            rate_burst: 5,
            retry: RetryConfig::default(),
            permit_manual_dosing: false,
        }
    }

    /// Check the config for values that cannot work.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !matches!(self.url.scheme(), "http" | "https") {
            return Err(CoreError::Config {
                message: format!("unsupported URL scheme: {}", self.url.scheme()),
            });
        }
        if !(self.rate_limit_per_sec.is_finite() && self.rate_limit_per_sec > 0.0) {
            return Err(CoreError::Config {
                message: "rate_limit_per_sec must be positive".into(),
            });
        }
        if self.rate_burst == 0 {
            return Err(CoreError::Config {
                message: "rate_burst must be at least 1".into(),
            });
        }
        if self.poll_interval < Duration::from_secs(1) {
            return Err(CoreError::Config {
                message: "poll_interval below 1s would monopolize the request budget".into(),
            });
        }
        if self.timeout.is_zero() {
            return Err(CoreError::Config {
                message: "timeout must be non-zero".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(CoreError::Config {
                message: "retry.max_attempts must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Host portion of the device URL, for identity and logging.
    #[must_use]
    pub fn host(&self) -> String {
        self.url
            .host_str()
            .map_or_else(|| self.url.to_string(), str::to_owned)
    }
}

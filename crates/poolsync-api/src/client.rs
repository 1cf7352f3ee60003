// Device HTTP client
//
// Wraps `reqwest::Client` with the controller's query-string URL
// construction, body classification, rate-budget admission, and retry
// with exponential backoff. Endpoint methods return typed payloads; the
// plaintext OK/ERROR envelope is stripped before the caller sees it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::limiter::{Priority, RateBudget};
use crate::protocol::{
    self, ConfigValues, DeviceAck, Readings, parse_config_values, parse_readings,
};
use crate::transport::TransportConfig;

/// HTTP Basic credentials for protected endpoints.
///
/// Anonymous read-only access is common on LAN installs, so the client
/// treats credentials as optional; the device answers protected calls
/// with its fixed rejection body when they are missing.
#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: SecretString,
}

/// Retry tuning for transient transport failures.
///
/// `delay = min(initial * 2^attempt, max)` plus deterministic jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first; 1 disables retries.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Which failures are worth a second attempt.
///
/// Reads are idempotent, so anything transient (timeout, connect failure,
/// garbled body) is retried. Writes are only retried when the request
/// provably never reached the device; a timed-out write is surfaced
/// rather than resent, because the first copy may already have switched
/// a relay.
#[derive(Debug, Clone, Copy)]
enum RetryPolicy {
    Read,
    Write,
}

/// Raw HTTP client for the pool controller's query-string API.
///
/// Every request first acquires a token from the shared [`RateBudget`],
/// retries included, so total pressure on the device stays bounded no
/// matter how many callers share the client.
#[derive(Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Option<BasicCredentials>,
    budget: Arc<RateBudget>,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl DeviceClient {
    /// Create a client for the device at `base_url` (the device root,
    /// e.g. `http://192.168.1.50`).
    pub fn new(
        base_url: Url,
        credentials: Option<BasicCredentials>,
        budget: Arc<RateBudget>,
        transport: &TransportConfig,
        retry: RetryConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            credentials,
            budget,
            retry,
            request_timeout: transport.timeout,
        })
    }

    /// The device base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The shared rate budget gating this client's traffic.
    pub fn budget(&self) -> &Arc<RateBudget> {
        &self.budget
    }

    /// Whether the client will attach credentials to requests.
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Full-state read: `GET /getReadings?ALL`.
    ///
    /// Returns every telemetry key the firmware exposes, in device order.
    pub async fn get_readings(&self, priority: Priority) -> Result<Readings, Error> {
        let url = self.endpoint_url("getReadings", Some("ALL"))?;
        self.request_with_retry(Method::GET, url, None, priority, RetryPolicy::Read, parse_readings)
            .await
    }

    /// Manual function command:
    /// `GET /setFunctionManually?<KEY>,<ACTION>,<DURATION>,<AUX>`.
    ///
    /// `duration_secs` of 0 means "until changed"; `aux` carries the pump
    /// speed level or DMX scene slot, 0 where not applicable.
    pub async fn set_function_manually(
        &self,
        key: &str,
        action: &str,
        duration_secs: u32,
        aux: u32,
        priority: Priority,
    ) -> Result<DeviceAck, Error> {
        let query = format!("{key},{action},{duration_secs},{aux}");
        let url = self.endpoint_url("setFunctionManually", Some(&query))?;
        self.request_with_retry(
            Method::GET,
            url,
            None,
            priority,
            RetryPolicy::Write,
            protocol::parse_ack,
        )
        .await
    }

    /// Setpoint write: `GET /setTargetValues?target=<NAME>&value=<VALUE>`.
    ///
    /// `value` must already be rendered the way the firmware expects
    /// (plain decimal, no exponent); callers own range validation.
    pub async fn set_target_value(
        &self,
        target: &str,
        value: &str,
        priority: Priority,
    ) -> Result<DeviceAck, Error> {
        let query = format!("target={target}&value={value}");
        let url = self.endpoint_url("setTargetValues", Some(&query))?;
        self.request_with_retry(
            Method::GET,
            url,
            None,
            priority,
            RetryPolicy::Write,
            protocol::parse_ack,
        )
        .await
    }

    /// Configuration read for selected keys: `GET /getConfig?<K1>,<K2>,...`.
    pub async fn get_config(
        &self,
        keys: &[&str],
        priority: Priority,
    ) -> Result<ConfigValues, Error> {
        let query = keys.join(",");
        let url = self.endpoint_url("getConfig", Some(&query))?;
        self.request_with_retry(
            Method::GET,
            url,
            None,
            priority,
            RetryPolicy::Read,
            parse_config_values,
        )
        .await
    }

    /// Configuration write: `POST /setConfig` with a JSON body; the device
    /// echoes the applied values back.
    pub async fn set_config(
        &self,
        values: &ConfigValues,
        priority: Priority,
    ) -> Result<ConfigValues, Error> {
        let url = self.endpoint_url("setConfig", None)?;
        self.request_with_retry(
            Method::POST,
            url,
            Some(values),
            priority,
            RetryPolicy::Write,
            parse_config_values,
        )
        .await
    }

    // ── Request plumbing ─────────────────────────────────────────────

    /// Build a full endpoint URL with the raw query string.
    ///
    /// The firmware parses its query strings positionally, so they are
    /// attached verbatim rather than percent-encoded key/value pairs.
    fn endpoint_url(&self, path: &str, query: Option<&str>) -> Result<Url, Error> {
        let mut url = self.base_url.join(path)?;
        url.set_query(query);
        Ok(url)
    }

    /// Acquire a token, send, classify, and retry transient failures
    /// according to `policy`.
    async fn request_with_retry<T>(
        &self,
        method: Method,
        url: Url,
        body: Option<&ConfigValues>,
        priority: Priority,
        policy: RetryPolicy,
        parse: fn(&str) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut attempt: u32 = 0;
        loop {
            // Retries pay for their own token; backoff never lets a
            // retry burst past the device's budget.
            self.budget.acquire(priority).await;
            debug!("{} {}", method, url);

            let outcome = match self.send_once(method.clone(), url.clone(), body).await {
                Ok(raw) => parse(&raw),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let transient = match policy {
                        RetryPolicy::Read => e.is_transient_for_read(),
                        RetryPolicy::Write => e.is_transient_for_write(),
                    };
                    attempt += 1;
                    if !transient || attempt >= self.retry.max_attempts {
                        return Err(e);
                    }
                    let delay = calculate_backoff(attempt - 1, &self.retry);
                    debug!(
                        error = %e,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One attempt: send the request and return the raw body.
    ///
    /// Only authentication statuses are mapped from the HTTP layer; any
    /// other status falls through to body classification, because the
    /// firmware signals success and failure in the body, not the status
    /// line.
    async fn send_once(
        &self,
        method: Method,
        url: Url,
        body: Option<&ConfigValues>,
    ) -> Result<String, Error> {
        let mut request = self.http.request(method, url);
        if let Some(ref creds) = self.credentials {
            request = request.basic_auth(&creds.username, Some(creds.password.expose_secret()));
        }
        if let Some(values) = body {
            request = request.json(values);
        }

        let resp = request.send().await.map_err(|e| self.map_transport(e))?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            let trimmed = body.trim();
            return Err(Error::Authentication {
                message: if trimmed.is_empty() {
                    format!("device returned HTTP {status}")
                } else {
                    trimmed.to_owned()
                },
            });
        }
        resp.text().await.map_err(|e| self.map_transport(e))
    }

    fn map_transport(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                timeout_secs: self.request_timeout.as_secs(),
            }
        } else {
            Error::Transport(e)
        }
    }
}

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out recovery storms when several clients
/// share one device.
fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt as i32);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    // Not cryptographically random, but good enough for backoff spread.
    let jitter_factor = 1.0 + 0.25 * ((attempt as f64 * 7.3).sin());
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

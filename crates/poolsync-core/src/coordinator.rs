// ── Device coordinator ──
//
// Full lifecycle management for one pool controller connection.
// Owns the rate-limited client, runs the polling loop, routes
// validated commands, and publishes snapshots through the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use poolsync_api::{
    BasicCredentials, ConfigValues, DeviceClient, Priority, RateBudget, TlsMode, TransportConfig,
};

use crate::command::{self, CommandOutcome};
use crate::config::{DeviceConfig, TlsVerification};
use crate::error::CoreError;
use crate::model::{DeviceAvailability, Snapshot, SnapshotUpdate};
use crate::store::SnapshotStore;
use crate::stream::SnapshotStream;

// ── DeviceCoordinator ────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc`. Manages the full device lifecycle:
/// transport construction, periodic polling, availability tracking,
/// command validation and routing, and reactive snapshot streaming.
#[derive(Clone)]
pub struct DeviceCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: DeviceConfig,
    host: String,
    client: DeviceClient,
    store: SnapshotStore,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Held across fetch and publish so at most one poll is in flight.
    refresh_lock: Mutex<()>,
}

impl DeviceCoordinator {
    /// Create a coordinator from configuration. Does NOT poll --
    /// call [`start()`](Self::start) to begin the polling loop, or
    /// [`refresh_once()`](Self::refresh_once) for a single read.
    pub fn new(config: DeviceConfig) -> Result<Self, CoreError> {
        config.validate()?;

        let transport = build_transport(&config);
        let budget = Arc::new(RateBudget::new(config.rate_limit_per_sec, config.rate_burst));
        let credentials = config.credentials.as_ref().map(|c| BasicCredentials {
            username: c.username.clone(),
            password: c.password.clone(),
        });
        let client = DeviceClient::new(
            config.url.clone(),
            credentials,
            budget,
            &transport,
            config.retry.clone(),
        )?;
        let host = config.host();

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                config,
                host,
                client,
                store: SnapshotStore::new(),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
                refresh_lock: Mutex::new(()),
            }),
        })
    }

    /// Access the device configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    /// Access the underlying snapshot store.
    pub fn store(&self) -> &SnapshotStore {
        &self.inner.store
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start the polling loop.
    ///
    /// Performs an initial poll, then spawns the background task that
    /// repeats it every `poll_interval`. A transient failure of the
    /// initial poll is tolerated (the loop keeps trying and the
    /// availability state reports it); rejected credentials are not.
    /// Starting a coordinator that is already polling fails with
    /// [`AlreadyStarted`](CoreError::AlreadyStarted).
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::NotRunning);
        }

        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() {
            return Err(CoreError::AlreadyStarted);
        }

        match self.refresh_once().await {
            Ok(_) => {}
            Err(e @ CoreError::AuthenticationFailed { .. }) => return Err(e),
            Err(e) => warn!(error = %e, "initial poll failed, retrying on schedule"),
        }

        let coordinator = self.clone();
        let cancel = self.inner.cancel.clone();
        let interval = self.inner.config.poll_interval;
        handles.push(tokio::spawn(poll_task(coordinator, interval, cancel)));

        info!(host = %self.inner.host, "coordinator started");
        Ok(())
    }

    /// Stop polling and wait for background tasks to finish.
    ///
    /// In-flight waiters on the rate budget are released; subsequent
    /// calls return [`NotRunning`](CoreError::NotRunning).
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!(host = %self.inner.host, "coordinator stopped");
    }

    /// Poll the device once and publish the result.
    ///
    /// On success the new snapshot replaces the current one atomically;
    /// on failure the previous snapshot stays current and the failure
    /// counts against availability. Concurrent refreshes are serialized;
    /// each caller still performs its own fetch.
    pub async fn refresh_once(&self) -> Result<Arc<Snapshot>, CoreError> {
        self.ensure_running()?;
        let _guard = self.inner.refresh_lock.lock().await;

        match self.inner.client.get_readings(Priority::Normal).await {
            Ok(readings) => {
                let update = self.inner.store.apply_readings(&self.inner.host, readings);
                Ok(Arc::clone(&update.snapshot))
            }
            Err(e) => {
                let availability = self.inner.store.record_failure();
                debug!(?availability, "poll failed");
                Err(e.into())
            }
        }
    }

    // ── Command execution ────────────────────────────────────────

    /// Run a manual function command: switch a relay, start a pump at a
    /// speed level, drive the cover, trigger a dosing pump.
    ///
    /// The key and action are checked against the function catalog and
    /// the parameters sanitized before anything reaches the wire. After
    /// the device acknowledges, the coordinator re-polls immediately so
    /// the next snapshot reflects the change.
    pub async fn execute_command(
        &self,
        key: &str,
        action: &str,
        duration_secs: u32,
        aux: u32,
    ) -> Result<CommandOutcome, CoreError> {
        self.ensure_running()?;
        let outcome = command::execute_function(
            &self.inner.client,
            self.inner.config.permit_manual_dosing,
            key,
            action,
            duration_secs,
            aux,
        )
        .await?;
        self.refresh_after_write().await;
        Ok(outcome)
    }

    /// Write a chemistry setpoint. Out-of-range values are refused,
    /// never clamped. A successful write triggers an immediate re-poll.
    pub async fn set_target(&self, target: &str, value: f64) -> Result<CommandOutcome, CoreError> {
        self.ensure_running()?;
        let outcome = command::write_target(&self.inner.client, target, value).await?;
        self.refresh_after_write().await;
        Ok(outcome)
    }

    /// Read selected device configuration keys.
    pub async fn read_config(&self, keys: &[&str]) -> Result<ConfigValues, CoreError> {
        self.ensure_running()?;
        command::read_config(&self.inner.client, keys).await
    }

    /// Write device configuration values; returns what the device
    /// reports it applied.
    pub async fn write_config(&self, values: &ConfigValues) -> Result<ConfigValues, CoreError> {
        self.ensure_running()?;
        command::write_config(&self.inner.client, values).await
    }

    /// Out-of-band poll after a state-changing command. The command
    /// already succeeded, so a failed re-poll only delays visibility
    /// until the next scheduled cycle.
    async fn refresh_after_write(&self) {
        if let Err(e) = self.refresh_once().await {
            warn!(error = %e, "post-command refresh failed");
        }
    }

    // ── One-shot convenience ─────────────────────────────────────

    /// One-shot: poll once, run the closure, shut down.
    ///
    /// Optimized for CLI use: no background polling loop is started.
    pub async fn oneshot<F, Fut, T>(config: DeviceConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(DeviceCoordinator) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let coordinator = DeviceCoordinator::new(config)?;
        coordinator.refresh_once().await?;
        let result = f(coordinator.clone()).await;
        coordinator.shutdown().await;
        result
    }

    // ── State observation ────────────────────────────────────────

    /// Most recent snapshot, or `None` before the first successful poll.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.store.snapshot()
    }

    /// Most recent snapshot, refusing stale data.
    ///
    /// Where [`snapshot()`](Self::snapshot) hands out whatever was last
    /// decoded, this fails with [`StaleData`](CoreError::StaleData) when
    /// no poll has succeeded yet or enough consecutive polls have failed
    /// that the device counts as unavailable.
    pub fn require_snapshot(&self) -> Result<Arc<Snapshot>, CoreError> {
        let availability = self.inner.store.availability();
        if let DeviceAvailability::Unavailable { failures } = availability {
            return Err(CoreError::StaleData { failures });
        }
        self.inner.store.snapshot().ok_or(CoreError::StaleData {
            failures: availability.failure_count(),
        })
    }

    /// Current reachability of the device.
    pub fn availability(&self) -> DeviceAvailability {
        self.inner.store.availability()
    }

    /// Subscribe to availability changes.
    pub fn watch_availability(&self) -> watch::Receiver<DeviceAvailability> {
        self.inner.store.watch_availability()
    }

    /// Subscribe to published snapshots.
    pub fn snapshots(&self) -> SnapshotStream {
        self.inner.store.subscribe()
    }

    /// Subscribe to per-cycle deltas.
    pub fn updates(&self) -> broadcast::Receiver<Arc<SnapshotUpdate>> {
        self.inner.store.subscribe_updates()
    }

    fn ensure_running(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::NotRunning);
        }
        Ok(())
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Ceiling on the stretched delay between polls of a failing device.
const MAX_POLL_DELAY: Duration = Duration::from_secs(300);

/// Periodically poll the device.
///
/// Consecutive failures stretch the delay between attempts; any
/// success snaps the cadence back to the configured interval.
async fn poll_task(coordinator: DeviceCoordinator, interval: Duration, cancel: CancellationToken) {
    let mut consecutive_failures: u32 = 0;

    loop {
        let delay = poll_delay(interval, consecutive_failures);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {
                match coordinator.refresh_once().await {
                    Ok(_) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        warn!(error = %e, consecutive_failures, "poll failed");
                    }
                }
            }
        }
    }
}

/// Delay before the next poll attempt.
///
/// Each consecutive failure doubles the configured interval, capped at
/// [`MAX_POLL_DELAY`]. The delay never drops below the interval itself.
fn poll_delay(interval: Duration, consecutive_failures: u32) -> Duration {
    let factor = 2u32.saturating_pow(consecutive_failures);
    let stretched = interval.saturating_mul(factor);
    if stretched > MAX_POLL_DELAY {
        MAX_POLL_DELAY.max(interval)
    } else {
        stretched
    }
}

// ── Transport construction ───────────────────────────────────────

fn build_transport(config: &DeviceConfig) -> TransportConfig {
    let tls = match &config.tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    };

    TransportConfig {
        tls,
        timeout: config.timeout,
    }
}

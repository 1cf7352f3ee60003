// ── Device snapshots and availability ──

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use poolsync_api::{Readings, TelemetryValue};
use serde::Serialize;

use super::decoded::DecodedState;

/// Consecutive failures after which the device is declared unreachable.
const UNAVAILABLE_AFTER: u32 = 3;

/// Static identity of the polled device, refreshed with every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DeviceIdentity {
    /// Host portion of the configured base URL.
    pub host: String,
    /// Firmware version, when the readings document reports one.
    pub firmware: Option<String>,
    /// Hardware serial, when the readings document reports one.
    pub serial: Option<String>,
}

/// One complete, internally consistent view of the device.
///
/// A snapshot is built from a single successful full-state read and
/// replaced atomically; consumers never observe half of one poll mixed
/// with half of another.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Wall-clock time the successful read completed.
    pub taken_at: DateTime<Utc>,
    /// Monotonic refresh counter, starting at 1 for the first snapshot.
    pub cycle: u64,
    pub identity: DeviceIdentity,
    /// Raw values exactly as reported, in device order.
    pub readings: Readings,
    /// Interpreted states for every key the decoder understands.
    pub decoded: IndexMap<String, DecodedState>,
}

impl Snapshot {
    /// Raw value for a telemetry key.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&TelemetryValue> {
        self.readings.get(key)
    }

    /// Decoded state for a telemetry key.
    #[must_use]
    pub fn decoded(&self, key: &str) -> Option<&DecodedState> {
        self.decoded.get(key)
    }

    /// Convenience: on/off meaning of a key, when it has one.
    #[must_use]
    pub fn is_active(&self, key: &str) -> Option<bool> {
        self.decoded.get(key).and_then(DecodedState::is_active)
    }
}

/// Delta between two consecutive snapshots.
///
/// Key lists name raw readings that appeared, changed value, or vanished
/// relative to the previous snapshot. The first snapshot reports every
/// key as added.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotUpdate {
    pub snapshot: std::sync::Arc<Snapshot>,
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl SnapshotUpdate {
    /// True when nothing moved between the two snapshots.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Reachability of the device as observed by the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeviceAvailability {
    /// No poll has completed yet.
    #[default]
    Unknown,
    /// Last poll succeeded.
    Available,
    /// Recent polls failed but the device is not yet written off; the
    /// last good snapshot remains current.
    Degraded { failures: u32 },
    /// Enough consecutive failures that consumers should treat the
    /// device as gone.
    Unavailable { failures: u32 },
}

impl DeviceAvailability {
    /// State after a successful poll.
    #[must_use]
    pub fn after_success(self) -> Self {
        Self::Available
    }

    /// State after a failed poll.
    #[must_use]
    pub fn after_failure(self) -> Self {
        let failures = self.failure_count().saturating_add(1);
        if failures >= UNAVAILABLE_AFTER {
            Self::Unavailable { failures }
        } else {
            Self::Degraded { failures }
        }
    }

    /// Consecutive failures recorded so far.
    #[must_use]
    pub fn failure_count(self) -> u32 {
        match self {
            Self::Unknown | Self::Available => 0,
            Self::Degraded { failures } | Self::Unavailable { failures } => failures,
        }
    }

    /// True only when the last poll succeeded.
    #[must_use]
    pub fn is_available(self) -> bool {
        self == Self::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_degrades_then_drops() {
        let mut state = DeviceAvailability::Unknown;
        state = state.after_failure();
        assert_eq!(state, DeviceAvailability::Degraded { failures: 1 });
        state = state.after_failure();
        assert_eq!(state, DeviceAvailability::Degraded { failures: 2 });
        state = state.after_failure();
        assert_eq!(state, DeviceAvailability::Unavailable { failures: 3 });
        state = state.after_failure();
        assert_eq!(state, DeviceAvailability::Unavailable { failures: 4 });
    }

    #[test]
    fn one_success_restores_availability() {
        let state = DeviceAvailability::Unavailable { failures: 7 };
        assert_eq!(state.after_success(), DeviceAvailability::Available);
        assert_eq!(state.after_success().failure_count(), 0);
    }
}

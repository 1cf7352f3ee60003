// ── Reactive snapshot store ──
//
// Storage for the device view. Exactly one snapshot is current at any
// time; replacements are published whole through a watch channel and
// the per-cycle delta through a broadcast channel. Availability is
// tracked beside the data so consumers can tell "stale" from "gone".

use std::sync::{Arc, Mutex, PoisonError};

use poolsync_api::Readings;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::decode;
use crate::model::{DeviceAvailability, Snapshot, SnapshotUpdate};
use crate::stream::SnapshotStream;

/// Buffered deltas per subscriber before the oldest are dropped.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

pub struct SnapshotStore {
    snapshot_tx: watch::Sender<Option<Arc<Snapshot>>>,
    availability_tx: watch::Sender<DeviceAvailability>,
    update_tx: broadcast::Sender<Arc<SnapshotUpdate>>,
    /// Refresh counter; its lock also serializes publication so diffs
    /// are always computed against the snapshot they replace.
    cycle: Mutex<u64>,
}

impl SnapshotStore {
    pub(crate) fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        let (availability_tx, _) = watch::channel(DeviceAvailability::default());
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            snapshot_tx,
            availability_tx,
            update_tx,
            cycle: Mutex::new(0),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// Most recent snapshot, or `None` before the first successful poll.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot_tx.borrow().clone()
    }

    /// Current reachability of the device.
    pub fn availability(&self) -> DeviceAvailability {
        *self.availability_tx.borrow()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe(&self) -> SnapshotStream {
        SnapshotStream::new(self.snapshot_tx.subscribe())
    }

    pub fn watch_availability(&self) -> watch::Receiver<DeviceAvailability> {
        self.availability_tx.subscribe()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<Arc<SnapshotUpdate>> {
        self.update_tx.subscribe()
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Decode a successful full read and publish it as the new snapshot.
    pub(crate) fn apply_readings(&self, host: &str, readings: Readings) -> Arc<SnapshotUpdate> {
        let mut cycle = self.lock_cycle();
        *cycle += 1;

        let snapshot = Arc::new(decode::build_snapshot(host, *cycle, readings));
        let previous = self.snapshot_tx.borrow().clone();
        let (added, changed, removed) = diff(previous.as_deref(), &snapshot);
        let update = Arc::new(SnapshotUpdate {
            snapshot: Arc::clone(&snapshot),
            added,
            changed,
            removed,
        });

        debug!(
            cycle = snapshot.cycle,
            keys = snapshot.readings.len(),
            added = update.added.len(),
            changed = update.changed.len(),
            removed = update.removed.len(),
            "snapshot published"
        );
        self.snapshot_tx.send_replace(Some(snapshot));
        let _ = self.update_tx.send(Arc::clone(&update));
        drop(cycle);

        self.record_success();
        update
    }

    fn record_success(&self) {
        self.availability_tx.send_if_modified(|state| {
            let next = state.after_success();
            if next == *state {
                return false;
            }
            if state.failure_count() > 0 {
                info!(failures = state.failure_count(), "device recovered");
            }
            *state = next;
            true
        });
    }

    /// Count a failed poll against the device, returning the new state.
    pub(crate) fn record_failure(&self) -> DeviceAvailability {
        let mut next = DeviceAvailability::Unknown;
        self.availability_tx.send_if_modified(|state| {
            next = state.after_failure();
            if next == *state {
                return false;
            }
            let newly_unavailable = matches!(next, DeviceAvailability::Unavailable { .. })
                && !matches!(state, DeviceAvailability::Unavailable { .. });
            if newly_unavailable {
                warn!(failures = next.failure_count(), "device marked unavailable");
            }
            *state = next;
            true
        });
        next
    }

    fn lock_cycle(&self) -> std::sync::MutexGuard<'_, u64> {
        self.cycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Key-level delta between the previous and next raw readings.
fn diff(previous: Option<&Snapshot>, next: &Snapshot) -> (Vec<String>, Vec<String>, Vec<String>) {
    let Some(previous) = previous else {
        return (next.readings.keys().cloned().collect(), Vec::new(), Vec::new());
    };

    let mut added = Vec::new();
    let mut changed = Vec::new();
    for (key, value) in &next.readings {
        match previous.readings.get(key) {
            None => added.push(key.clone()),
            Some(old) if old != value => changed.push(key.clone()),
            Some(_) => {}
        }
    }
    let removed = previous
        .readings
        .keys()
        .filter(|key| !next.readings.contains_key(*key))
        .cloned()
        .collect();

    (added, changed, removed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use poolsync_api::parse_readings;
    use pretty_assertions::assert_eq;

    use super::*;

    fn readings(json: &str) -> Readings {
        parse_readings(json).unwrap()
    }

    #[test]
    fn first_snapshot_reports_every_key_as_added() {
        let store = SnapshotStore::new();
        assert!(store.snapshot().is_none());

        let update = store.apply_readings("pool.local", readings(r#"{"PUMP":"1","ONEWIRE1A":24.5}"#));
        assert_eq!(update.snapshot.cycle, 1);
        assert_eq!(update.added, vec!["PUMP".to_string(), "ONEWIRE1A".to_string()]);
        assert!(update.changed.is_empty());
        assert!(update.removed.is_empty());
        assert_eq!(store.availability(), DeviceAvailability::Available);
    }

    #[test]
    fn deltas_track_changed_and_removed_keys() {
        let store = SnapshotStore::new();
        store.apply_readings("pool.local", readings(r#"{"PUMP":"1","LIGHT":"0","ECO":"0"}"#));
        let update = store.apply_readings("pool.local", readings(r#"{"PUMP":"3","LIGHT":"0","COVER":"1"}"#));

        assert_eq!(update.snapshot.cycle, 2);
        assert_eq!(update.added, vec!["COVER".to_string()]);
        assert_eq!(update.changed, vec!["PUMP".to_string()]);
        assert_eq!(update.removed, vec!["ECO".to_string()]);
        assert!(!update.is_noop());
    }

    #[test]
    fn identical_polls_produce_a_noop_delta() {
        let store = SnapshotStore::new();
        store.apply_readings("pool.local", readings(r#"{"PUMP":"1"}"#));
        let update = store.apply_readings("pool.local", readings(r#"{"PUMP":"1"}"#));
        assert!(update.is_noop());
        assert_eq!(update.snapshot.cycle, 2);
    }

    #[test]
    fn failures_degrade_availability_without_touching_the_snapshot() {
        let store = SnapshotStore::new();
        let first = store.apply_readings("pool.local", readings(r#"{"PUMP":"1"}"#));

        assert_eq!(store.record_failure(), DeviceAvailability::Degraded { failures: 1 });
        assert_eq!(store.record_failure(), DeviceAvailability::Degraded { failures: 2 });
        assert_eq!(
            store.record_failure(),
            DeviceAvailability::Unavailable { failures: 3 }
        );
        assert_eq!(store.snapshot(), Some(Arc::clone(&first.snapshot)));

        store.apply_readings("pool.local", readings(r#"{"PUMP":"0"}"#));
        assert_eq!(store.availability(), DeviceAvailability::Available);
    }

    #[test]
    fn subscribers_receive_published_updates() {
        let store = SnapshotStore::new();
        let mut updates = store.subscribe_updates();

        store.apply_readings("pool.local", readings(r#"{"PUMP":"1"}"#));
        let update = updates.try_recv().unwrap();
        assert_eq!(update.added, vec!["PUMP".to_string()]);
    }
}

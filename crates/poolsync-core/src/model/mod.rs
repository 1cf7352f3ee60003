// ── Domain model ──
//
// Canonical representations of device state as consumers see it: decoded
// per-key states, whole-device snapshots, and availability. Raw wire
// values stay in `poolsync_api`; everything here is already interpreted.

pub mod decoded;
pub mod snapshot;

// ── Re-exports ──────────────────────────────────────────────────────

pub use decoded::{ArrayState, CompositeState, DecodedState, ScalarState};
pub use snapshot::{DeviceAvailability, DeviceIdentity, Snapshot, SnapshotUpdate};

// Raw wire value, re-exported so consumers rarely need `poolsync_api`
// directly.
pub use poolsync_api::TelemetryValue;

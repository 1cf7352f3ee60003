// poolsync-core: Device coordination layer between poolsync-api and consumers.

pub mod catalog;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod decode;
pub mod error;
pub mod model;
pub mod sanitize;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::CommandOutcome;
pub use config::{DeviceConfig, DeviceCredentials, TlsVerification};
pub use coordinator::DeviceCoordinator;
pub use error::CoreError;
pub use store::SnapshotStore;
pub use stream::SnapshotStream;

// Re-export model and catalog types at the crate root for ergonomics.
pub use catalog::{Action, DecodeKind, FunctionSpec, TargetSpec, ValueClass};
pub use model::{
    ArrayState, CompositeState, DecodedState, DeviceAvailability, DeviceIdentity, ScalarState,
    Snapshot, SnapshotUpdate, TelemetryValue,
};
pub use sanitize::{Clamp, ClampField, SanitizedCommand};

// Retry tuning is part of `DeviceConfig`; re-exported so consumers can
// fill it without importing `poolsync_api`.
pub use poolsync_api::RetryConfig;

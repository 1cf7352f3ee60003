// poolsync-api: Async Rust client for the pool controller's query-string HTTP API

pub mod client;
pub mod error;
pub mod limiter;
pub mod protocol;
pub mod transport;

pub use client::{BasicCredentials, DeviceClient, RetryConfig};
pub use error::Error;
pub use limiter::{Priority, RateBudget};
pub use protocol::{parse_readings, ConfigValues, DeviceAck, Readings, TelemetryValue};
pub use transport::{TlsMode, TransportConfig};

//! Wire types for the controller's query-string API.
//!
//! The firmware speaks two body formats. Read endpoints answer with a flat
//! JSON object whose values are strings, numbers, or arrays of strings;
//! write endpoints answer with a short plaintext acknowledgement whose
//! first line starts with `OK` or `ERROR`. Both are parsed here, close to
//! the bytes, so the rest of the stack only sees typed values.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One raw telemetry value exactly as the firmware reports it.
///
/// The device never nests objects inside the readings document, so three
/// shapes cover the whole surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    /// Numeric reading (temperature, pressure, runtime seconds, state code).
    Number(f64),
    /// Free-form text (firmware version, display strings, composite codes).
    Text(String),
    /// List of condition tokens; empty means "nothing to report".
    List(Vec<String>),
}

impl TelemetryValue {
    /// Numeric value, if this is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Whole-number value, if this is a number without a fractional part.
    ///
    /// State codes arrive as JSON numbers; anything with a fraction is a
    /// measurement, not a code.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            // The magnitude bound keeps the cast exact.
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Some(*n as i64),
            _ => None,
        }
    }

    /// Borrowed text, if this is a string.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrowed token list, if this is an array.
    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl std::fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                write!(f, "{n:.0}")
            }
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// Full-state read result: telemetry key to raw value, in device order.
///
/// Key order is preserved because the firmware groups related keys
/// together and diagnostics read much better that way.
pub type Readings = IndexMap<String, TelemetryValue>;

/// Configuration document: requested key to raw JSON value.
pub type ConfigValues = IndexMap<String, serde_json::Value>;

/// Parse a `getReadings` body.
pub fn parse_readings(body: &str) -> Result<Readings, Error> {
    serde_json::from_str(body).map_err(|e| Error::Deserialization {
        message: format!("readings document: {e}"),
        body: body.to_owned(),
    })
}

/// Parse a `getConfig` or `setConfig` echo body.
pub fn parse_config_values(body: &str) -> Result<ConfigValues, Error> {
    serde_json::from_str(body).map_err(|e| Error::Deserialization {
        message: format!("configuration document: {e}"),
        body: body.to_owned(),
    })
}

// ── Plaintext acknowledgements ──

/// First-line prefix the firmware uses for refused requests.
pub const ERROR_MARKER: &str = "ERROR";

/// Reason fragment in the fixed body sent for unauthenticated writes.
pub const AUTH_REJECTION: &str = "NOT AUTHORIZED";

/// Parsed plaintext acknowledgement from a write endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAck {
    /// Informational text beyond the bare status line, if any.
    pub detail: Option<String>,
}

/// Classify a write acknowledgement body.
///
/// Success means "no error marker": any body whose first non-blank line
/// does not start with `ERROR` is an acknowledgement, whatever else it
/// says and whatever the HTTP status was. Refusals keep the firmware's
/// reason text verbatim; the fixed rejection for missing credentials maps
/// to [`Error::Authentication`] so callers never retry it.
pub fn parse_ack(body: &str) -> Result<DeviceAck, Error> {
    let mut lines = body.lines().map(str::trim).filter(|line| !line.is_empty());
    let Some(status) = lines.next() else {
        return Ok(DeviceAck { detail: None });
    };

    if let Some(rest) = status.strip_prefix(ERROR_MARKER) {
        let mut parts: Vec<&str> = Vec::new();
        let rest = rest.trim_start_matches([':', ' ']);
        if !rest.is_empty() {
            parts.push(rest);
        }
        parts.extend(lines);
        let reason = if parts.is_empty() {
            "device reported an error".to_owned()
        } else {
            parts.join("\n")
        };
        if reason.to_ascii_uppercase().contains(AUTH_REJECTION) {
            return Err(Error::Authentication { message: reason });
        }
        return Err(Error::DeviceRejected { reason });
    }

    let mut parts: Vec<&str> = Vec::new();
    let rest = status.strip_prefix("OK").unwrap_or(status);
    let rest = rest.trim_start_matches([':', ' ']);
    if !rest.is_empty() {
        parts.push(rest);
    }
    parts.extend(lines);
    Ok(DeviceAck {
        detail: if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        },
    })
}

// ── Decoded per-key state ──

use serde::Serialize;

use crate::catalog::ValueClass;

/// Integer state code interpreted through a class's code table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalarState {
    pub class: ValueClass,
    pub code: i64,
    /// Whether the code means "running / engaged" for this class.
    pub is_active: bool,
    /// Human label for the code; `None` when the firmware sent a code
    /// outside the class's table.
    pub label: Option<&'static str>,
}

/// State code plus an optional `|DETAIL_TOKEN` suffix.
///
/// Primary machinery reports these when a protection rule is driving the
/// output (`3|PUMP_ANTI_FREEZE`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeState {
    pub class: ValueClass,
    /// Leading state code; `None` when the text had no parsable code
    /// and is carried as an anomaly.
    pub code: Option<i64>,
    pub is_active: bool,
    pub label: Option<&'static str>,
    /// Raw detail token, exactly as reported.
    pub detail: Option<String>,
    /// Detail token rendered for humans (`Pump Anti Freeze`).
    pub detail_readable: Option<String>,
}

/// List of condition tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayState {
    /// Raw tokens, device order.
    pub items: Vec<String>,
    /// True when the list is non-empty.
    pub has_issues: bool,
    /// `no issues`, or the tokens joined with `, `.
    pub detail_readable: String,
}

/// One telemetry key's value after interpretation.
///
/// Decoding is total: every raw value maps to exactly one of these
/// variants, and feeding a value through twice yields the same result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecodedState {
    Scalar(ScalarState),
    Composite(CompositeState),
    Array(ArrayState),
}

impl DecodedState {
    /// On/off meaning for switchable keys; `None` for condition lists.
    #[must_use]
    pub fn is_active(&self) -> Option<bool> {
        match self {
            Self::Scalar(s) => Some(s.is_active),
            Self::Composite(c) => Some(c.is_active),
            Self::Array(_) => None,
        }
    }

    /// Whether a condition list has anything to report; `None` for
    /// scalar and composite states.
    #[must_use]
    pub fn has_issues(&self) -> Option<bool> {
        match self {
            Self::Array(a) => Some(a.has_issues),
            _ => None,
        }
    }

    /// The integer state code, where one exists.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Scalar(s) => Some(s.code),
            Self::Composite(c) => c.code,
            Self::Array(_) => None,
        }
    }

    /// Raw detail token for composite states.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Composite(c) => c.detail.as_deref(),
            _ => None,
        }
    }

    /// Human-readable detail text, where one exists.
    #[must_use]
    pub fn detail_readable(&self) -> Option<&str> {
        match self {
            Self::Composite(c) => c.detail_readable.as_deref(),
            Self::Array(a) => Some(&a.detail_readable),
            Self::Scalar(_) => None,
        }
    }

    /// True when the state code was found in its class's table.
    ///
    /// Condition lists are always considered mapped; any token set is a
    /// legal value for them.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        match self {
            Self::Scalar(s) => s.label.is_some(),
            Self::Composite(c) => c.label.is_some(),
            Self::Array(_) => true,
        }
    }
}

impl std::fmt::Display for DecodedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(s) => match s.label {
                Some(label) => f.write_str(label),
                None => write!(f, "state {}", s.code),
            },
            Self::Composite(c) => {
                match (c.label, c.code) {
                    (Some(label), _) => f.write_str(label)?,
                    (None, Some(code)) => write!(f, "state {code}")?,
                    (None, None) => f.write_str("unknown state")?,
                }
                if let Some(ref readable) = c.detail_readable {
                    write!(f, " ({readable})")?;
                }
                Ok(())
            }
            Self::Array(a) => f.write_str(&a.detail_readable),
        }
    }
}

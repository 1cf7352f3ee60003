// ── Write-parameter sanitation ──
//
// Everything headed for the device passes through here first. Two rules,
// applied in this order:
//
//   1. Chemical setpoints are validated, never adjusted. A pH of 9.9 is
//      refused outright; silently substituting a "nearby" value would
//      change water chemistry behind the caller's back.
//   2. Mechanical parameters (run duration, speed level) are clamped to
//      the catalog's ceilings, and every clamp is reported back so the
//      caller knows what was actually sent.

use serde::Serialize;
use strum::Display;

use crate::catalog::{self, Action, FunctionSpec, TargetSpec};
use crate::error::CoreError;

/// One parameter adjustment applied on the way to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Clamp {
    pub field: ClampField,
    pub requested: u32,
    pub applied: u32,
}

/// Which positional parameter a clamp touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClampField {
    Duration,
    Aux,
}

/// A function command after validation, ready for the wire.
#[derive(Debug, Clone)]
pub struct SanitizedCommand {
    pub spec: &'static FunctionSpec,
    pub action: Action,
    pub duration_secs: u32,
    pub aux: u32,
    /// Adjustments made to the requested parameters, empty when the
    /// request went through untouched.
    pub clamps: Vec<Clamp>,
}

/// Validate a manual function command against the catalog.
///
/// Unknown keys and unsupported actions are refused; oversized duration
/// and aux values are clamped and reported.
pub fn sanitize_command(
    key: &str,
    action: Action,
    duration_secs: u32,
    aux: u32,
) -> Result<SanitizedCommand, CoreError> {
    let Some(spec) = catalog::function_spec(key) else {
        return Err(CoreError::UnsupportedDevice {
            key: key.to_owned(),
        });
    };
    if !spec.actions.contains(&action) {
        return Err(CoreError::UnsupportedAction {
            key: key.to_owned(),
            action: action.to_string(),
        });
    }

    let mut clamps = Vec::new();

    let duration_secs = if spec.max_duration_secs > 0 && duration_secs > spec.max_duration_secs {
        clamps.push(Clamp {
            field: ClampField::Duration,
            requested: duration_secs,
            applied: spec.max_duration_secs,
        });
        spec.max_duration_secs
    } else {
        duration_secs
    };

    let aux = if aux > spec.max_aux {
        clamps.push(Clamp {
            field: ClampField::Aux,
            requested: aux,
            applied: spec.max_aux,
        });
        spec.max_aux
    } else {
        aux
    };

    Ok(SanitizedCommand {
        spec,
        action,
        duration_secs,
        aux,
        clamps,
    })
}

/// Tolerance for placing a value on its step grid; covers the noise of
/// decimal steps in binary floats.
const STEP_EPSILON: f64 = 1e-9;

/// Validate a setpoint write and render the value for the wire.
///
/// Returns the wire rendering (`7.2`, `650`) on success. Out-of-range
/// values are refused with the permitted range attached; values off the
/// target's step grid are refused too, since the firmware would round
/// them silently.
pub fn validate_target(name: &str, value: f64) -> Result<String, CoreError> {
    let Some(spec) = catalog::target_spec(name) else {
        return Err(CoreError::ValidationFailed {
            message: format!("unknown setpoint target: {name}"),
        });
    };
    if !value.is_finite() {
        return Err(CoreError::ValidationFailed {
            message: format!("setpoint {name} must be a finite number"),
        });
    }
    if value < spec.min || value > spec.max {
        return Err(CoreError::TargetOutOfRange {
            target: spec.name.to_owned(),
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    if let Some(step) = spec.step {
        let steps = ((value - spec.min) / step).round();
        let on_grid = spec.min + steps * step;
        if (value - on_grid).abs() > STEP_EPSILON {
            return Err(CoreError::ValidationFailed {
                message: format!(
                    "setpoint {name} must step by {step} from {min}",
                    min = spec.min
                ),
            });
        }
    }
    Ok(render_value(value))
}

/// Validate free text headed for the device (configuration key names).
///
/// The firmware embeds these strings into its own pages and files, so
/// control characters and markup-significant characters are refused
/// outright rather than escaped.
pub fn validate_text(field: &str, text: &str) -> Result<(), CoreError> {
    if text.is_empty() {
        return Err(CoreError::ValidationFailed {
            message: format!("{field} must not be empty"),
        });
    }
    if text.chars().any(char::is_control) {
        return Err(CoreError::ValidationFailed {
            message: format!("{field} contains control characters"),
        });
    }
    if text.contains(['<', '>', '"', '\'', '&', ';']) {
        return Err(CoreError::ValidationFailed {
            message: format!("{field} contains markup characters"),
        });
    }
    Ok(())
}

/// The range a target accepts, for callers building their own prompts.
#[must_use]
pub fn target_range(name: &str) -> Option<&'static TargetSpec> {
    catalog::target_spec(name)
}

/// Plain decimal rendering, at most three fractional digits, no
/// trailing zeros and never an exponent.
fn render_value(value: f64) -> String {
    let rendered = format!("{value:.3}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    rendered.to_owned()
}

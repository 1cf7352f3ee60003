// ── Command routing ──
//
// Validated write paths to the device. Every command is prepared first
// (catalog lookup, sanitation, dosing gate, priority selection) as a
// pure step, then sent through the shared client. Preparation failures
// never touch the network.

use poolsync_api::{ConfigValues, DeviceClient, Priority};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{Action, ValueClass};
use crate::error::CoreError;
use crate::sanitize::{self, Clamp};

/// Result of an acknowledged write.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CommandOutcome {
    /// Informational text from the device's acknowledgement, if any.
    pub detail: Option<String>,
    /// Parameter adjustments applied before sending.
    pub clamps: Vec<Clamp>,
}

/// A function command that passed validation.
#[derive(Debug, Clone)]
struct PreparedCommand {
    action: Action,
    duration_secs: u32,
    aux: u32,
    priority: Priority,
    clamps: Vec<Clamp>,
}

/// Validate and sanitize a manual function command.
fn prepare_function(
    permit_manual_dosing: bool,
    key: &str,
    action: &str,
    duration_secs: u32,
    aux: u32,
) -> Result<PreparedCommand, CoreError> {
    let action: Action = action.parse().map_err(|_| CoreError::UnsupportedAction {
        key: key.to_owned(),
        action: action.to_owned(),
    })?;
    let cmd = sanitize::sanitize_command(key, action, duration_secs, aux)?;

    if cmd.spec.class == ValueClass::Dosing
        && action == Action::Manual
        && !permit_manual_dosing
    {
        return Err(CoreError::DosingNotPermitted {
            key: key.to_owned(),
        });
    }

    Ok(PreparedCommand {
        action,
        duration_secs: cmd.duration_secs,
        aux: cmd.aux,
        priority: command_priority(cmd.spec.class, action),
        clamps: cmd.clamps,
    })
}

/// Lane selection for a write.
///
/// Anything that can stop a chemical feed or a moving cover outranks
/// ordinary switching; ordinary switching outranks polls.
fn command_priority(class: ValueClass, action: Action) -> Priority {
    match (class, action) {
        (ValueClass::Dosing, _) | (ValueClass::Cover, Action::Stop) => Priority::Critical,
        _ => Priority::High,
    }
}

/// Validate, sanitize, and send a manual function command.
pub(crate) async fn execute_function(
    client: &DeviceClient,
    permit_manual_dosing: bool,
    key: &str,
    action: &str,
    duration_secs: u32,
    aux: u32,
) -> Result<CommandOutcome, CoreError> {
    let prepared = prepare_function(permit_manual_dosing, key, action, duration_secs, aux)?;
    for clamp in &prepared.clamps {
        warn!(
            key,
            field = %clamp.field,
            requested = clamp.requested,
            applied = clamp.applied,
            "parameter clamped to device limits"
        );
    }

    let ack = client
        .set_function_manually(
            key,
            prepared.action.into(),
            prepared.duration_secs,
            prepared.aux,
            prepared.priority,
        )
        .await?;

    info!(key, action = %prepared.action, "device acknowledged command");
    Ok(CommandOutcome {
        detail: ack.detail,
        clamps: prepared.clamps,
    })
}

/// Validate a setpoint and send it.
pub(crate) async fn write_target(
    client: &DeviceClient,
    target: &str,
    value: f64,
) -> Result<CommandOutcome, CoreError> {
    let rendered = sanitize::validate_target(target, value)?;
    let ack = client
        .set_target_value(target, &rendered, Priority::High)
        .await?;
    info!(target, value = %rendered, "device acknowledged setpoint");
    Ok(CommandOutcome {
        detail: ack.detail,
        clamps: Vec::new(),
    })
}

/// Read selected configuration keys.
pub(crate) async fn read_config(
    client: &DeviceClient,
    keys: &[&str],
) -> Result<ConfigValues, CoreError> {
    if keys.is_empty() {
        return Err(CoreError::ValidationFailed {
            message: "configuration read needs at least one key".into(),
        });
    }
    for key in keys {
        sanitize::validate_text("configuration key", key)?;
    }
    Ok(client.get_config(keys, Priority::Low).await?)
}

/// Write configuration values; the device echoes what it applied.
pub(crate) async fn write_config(
    client: &DeviceClient,
    values: &ConfigValues,
) -> Result<ConfigValues, CoreError> {
    if values.is_empty() {
        return Err(CoreError::ValidationFailed {
            message: "configuration write needs at least one value".into(),
        });
    }
    for key in values.keys() {
        sanitize::validate_text("configuration key", key)?;
    }
    Ok(client.set_config(values, Priority::High).await?)
}

// ── Function-key catalog ──
//
// Flat, compile-time metadata about everything the firmware exposes:
// which keys are controllable, what class of device sits behind each
// key, which actions it accepts, and how its state values are decoded.
// Decode behavior is resolved from this table, never from the runtime
// shape of a value, so one firmware quirk cannot flip a key's meaning.

use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};

/// Device class behind a function key.
///
/// The class picks the state-code table and the action set; `Generic`
/// is the fallback for keys the catalog has never heard of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValueClass {
    /// Circulation-critical machinery: pump, solar circuit, heater.
    Primary,
    /// Plain relays and features: lighting, eco mode, extension outputs.
    Switch,
    /// Dosing pumps (chlorine, pH minus/plus, flocculant).
    Dosing,
    /// DMX lighting scenes.
    DmxScene,
    /// Pool cover drive.
    Cover,
    /// Unknown key; decoded with the most conservative tables.
    Generic,
}

/// How a key's raw value is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    /// Plain integer state code.
    Scalar,
    /// Integer state code, optionally followed by `|DETAIL_TOKEN`.
    Composite,
    /// List of condition tokens; empty means all clear.
    Array,
}

/// Manual action accepted by a controllable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Action {
    On,
    Off,
    Auto,
    /// Timed manual dose.
    Manual,
    /// Momentary trigger (DMX scene fire).
    Push,
    Open,
    Close,
    Stop,
}

/// Catalog entry for one controllable function key.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub class: ValueClass,
    pub decode: DecodeKind,
    pub actions: &'static [Action],
    /// Highest meaningful auxiliary value (pump speed level, PV surplus
    /// speed). 0 means the slot is unused for this key.
    pub max_aux: u32,
    /// Ceiling for timed runs, in seconds.
    pub max_duration_secs: u32,
}

const DAY_SECS: u32 = 86_400;
const DOSING_RUN_CAP_SECS: u32 = 3_600;

const PRIMARY_SPEC: FunctionSpec = FunctionSpec {
    class: ValueClass::Primary,
    decode: DecodeKind::Composite,
    actions: &[Action::On, Action::Off, Action::Auto],
    max_aux: 0,
    max_duration_secs: DAY_SECS,
};

const PUMP_SPEC: FunctionSpec = FunctionSpec {
    // Same as the other primaries, but the aux slot selects speed 1-3.
    max_aux: 3,
    ..PRIMARY_SPEC
};

const SWITCH_SPEC: FunctionSpec = FunctionSpec {
    class: ValueClass::Switch,
    decode: DecodeKind::Scalar,
    actions: &[Action::On, Action::Off, Action::Auto],
    max_aux: 0,
    max_duration_secs: DAY_SECS,
};

const PV_SURPLUS_SPEC: FunctionSpec = FunctionSpec {
    max_aux: 3,
    ..SWITCH_SPEC
};

const DOSING_SPEC: FunctionSpec = FunctionSpec {
    class: ValueClass::Dosing,
    decode: DecodeKind::Scalar,
    actions: &[Action::Manual, Action::Off, Action::Auto],
    max_aux: 0,
    max_duration_secs: DOSING_RUN_CAP_SECS,
};

const DMX_SCENE_SPEC: FunctionSpec = FunctionSpec {
    class: ValueClass::DmxScene,
    decode: DecodeKind::Scalar,
    actions: &[Action::On, Action::Off, Action::Auto, Action::Push],
    max_aux: 0,
    max_duration_secs: DAY_SECS,
};

const COVER_SPEC: FunctionSpec = FunctionSpec {
    class: ValueClass::Cover,
    decode: DecodeKind::Scalar,
    actions: &[Action::Open, Action::Close, Action::Stop],
    max_aux: 0,
    max_duration_secs: 0,
};

/// Look up the catalog entry for a function key.
///
/// Returns `None` for telemetry-only keys (temperatures, pressures) and
/// for keys outside the known families.
#[must_use]
pub fn function_spec(key: &str) -> Option<&'static FunctionSpec> {
    match key {
        "PUMP" => Some(&PUMP_SPEC),
        "SOLAR" | "HEATER" => Some(&PRIMARY_SPEC),
        "LIGHT" | "ECO" | "BACKWASH" | "BACKWASHRINSE" | "REFILL" => Some(&SWITCH_SPEC),
        "PVSURPLUS" => Some(&PV_SURPLUS_SPEC),
        "DOS_1_CL" | "DOS_4_PHM" | "DOS_5_PHP" | "DOS_6_FLOC" => Some(&DOSING_SPEC),
        "COVER" => Some(&COVER_SPEC),
        k if is_extension_relay(k) => Some(&SWITCH_SPEC),
        k if is_omni_output(k) => Some(&SWITCH_SPEC),
        k if is_dmx_scene(k) => Some(&DMX_SCENE_SPEC),
        _ => None,
    }
}

/// `EXT1_1`..`EXT1_8` and `EXT2_1`..`EXT2_8`.
fn is_extension_relay(key: &str) -> bool {
    ["EXT1_", "EXT2_"].iter().any(|prefix| {
        key.strip_prefix(prefix)
            .and_then(|n| n.parse::<u8>().ok())
            .is_some_and(|n| (1..=8).contains(&n))
    })
}

/// `OMNI_DC0`..`OMNI_DC5`.
fn is_omni_output(key: &str) -> bool {
    key.strip_prefix("OMNI_DC")
        .and_then(|n| n.parse::<u8>().ok())
        .is_some_and(|n| n <= 5)
}

/// `DMX_SCENE1`..`DMX_SCENE12`.
fn is_dmx_scene(key: &str) -> bool {
    key.strip_prefix("DMX_SCENE")
        .and_then(|n| n.parse::<u8>().ok())
        .is_some_and(|n| (1..=12).contains(&n))
}

// ── State-code tables ────────────────────────────────────────────────

/// State codes that mean "running / engaged" for a class.
///
/// The firmware distinguishes how a state was reached (schedule, manual
/// override, forced rule); these tables collapse that to on/off.
#[must_use]
pub const fn active_codes(class: ValueClass) -> &'static [i64] {
    match class {
        ValueClass::Primary | ValueClass::Switch => &[1, 3, 4],
        ValueClass::Dosing => &[1, 3],
        ValueClass::DmxScene => &[1, 2],
        ValueClass::Cover => &[1, 3],
        ValueClass::Generic => &[1],
    }
}

/// Human-readable label for a state code, or `None` if the firmware
/// sent a code outside the class's table.
#[must_use]
pub fn scalar_label(class: ValueClass, code: i64) -> Option<&'static str> {
    let label = match (class, code) {
        (ValueClass::Primary | ValueClass::Switch, 0) => "Auto (off)",
        (ValueClass::Primary | ValueClass::Switch, 1) => "Auto (on)",
        (ValueClass::Primary | ValueClass::Switch, 2) => "Off",
        (ValueClass::Primary | ValueClass::Switch, 3) => "On",
        (ValueClass::Primary | ValueClass::Switch, 4) => "Forced on",
        (ValueClass::Primary | ValueClass::Switch, 5) => "Forced off",
        (ValueClass::Dosing, 0) => "Auto (idle)",
        (ValueClass::Dosing, 1) => "Auto (dosing)",
        (ValueClass::Dosing, 2) => "Off",
        (ValueClass::Dosing, 3) => "Manual dosing",
        (ValueClass::DmxScene, 0) => "Off",
        (ValueClass::DmxScene, 1) => "On",
        (ValueClass::DmxScene, 2) => "Scene active",
        (ValueClass::Cover, 0) => "Closed",
        (ValueClass::Cover, 1) => "Opening",
        (ValueClass::Cover, 2) => "Open",
        (ValueClass::Cover, 3) => "Closing",
        (ValueClass::Cover, 4) => "Stopped",
        (ValueClass::Generic, 0) => "Off",
        (ValueClass::Generic, 1) => "On",
        _ => return None,
    };
    Some(label)
}

// ── Setpoint targets ─────────────────────────────────────────────────

/// One writable setpoint with its safe range.
///
/// Chemical ranges are hard limits: a value outside them is refused,
/// never clamped, because "nearest safe value" is not a thing you want
/// a dosing controller to improvise.
#[derive(Debug, Clone, Copy)]
pub struct TargetSpec {
    /// Wire name, case-sensitive (`target=pH&value=...`).
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    /// Grid the firmware accepts; values off the grid are refused.
    pub step: Option<f64>,
    pub unit: &'static str,
}

pub const TARGETS: &[TargetSpec] = &[
    TargetSpec {
        name: "pH",
        min: 6.8,
        max: 7.8,
        step: Some(0.1),
        unit: "pH",
    },
    TargetSpec {
        name: "ORP",
        min: 600.0,
        max: 850.0,
        step: Some(10.0),
        unit: "mV",
    },
    TargetSpec {
        name: "MinChlorine",
        min: 0.1,
        max: 3.0,
        step: None,
        unit: "mg/l",
    },
];

/// Look up a setpoint target by its exact wire name.
#[must_use]
pub fn target_spec(name: &str) -> Option<&'static TargetSpec> {
    TARGETS.iter().find(|t| t.name == name)
}

// ── Well-known telemetry keys ────────────────────────────────────────

/// Firmware version string in the readings document.
pub const FIRMWARE_KEY: &str = "FW";

/// Hardware serial string in the readings document.
pub const SERIAL_KEY: &str = "SERIAL";

/// Condition-token arrays the catalog pins to `Array` decoding even
/// when a poll happens to report them empty.
#[must_use]
pub fn is_condition_list(key: &str) -> bool {
    matches!(key, "OVERFLOW_REFILL_STATE" | "ERROR_LIST")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn families_resolve_within_bounds() {
        assert!(function_spec("EXT1_1").is_some());
        assert!(function_spec("EXT2_8").is_some());
        assert!(function_spec("EXT2_9").is_none());
        assert!(function_spec("EXT3_1").is_none());
        assert!(function_spec("OMNI_DC0").is_some());
        assert!(function_spec("OMNI_DC5").is_some());
        assert!(function_spec("OMNI_DC6").is_none());
        assert!(function_spec("DMX_SCENE12").is_some());
        assert!(function_spec("DMX_SCENE13").is_none());
    }

    #[test]
    fn telemetry_keys_are_not_controllable() {
        assert!(function_spec("WATER_TEMP").is_none());
        assert!(function_spec("ADC1").is_none());
    }

    #[test]
    fn pump_accepts_speed_aux() {
        let spec = function_spec("PUMP").unwrap();
        assert_eq!(spec.max_aux, 3);
        assert!(spec.actions.contains(&Action::On));
        assert!(!spec.actions.contains(&Action::Push));
    }

    #[test]
    fn dosing_runs_are_time_capped() {
        let spec = function_spec("DOS_1_CL").unwrap();
        assert_eq!(spec.class, ValueClass::Dosing);
        assert_eq!(spec.max_duration_secs, 3_600);
        assert!(spec.actions.contains(&Action::Manual));
    }

    #[test]
    fn action_names_render_uppercase() {
        assert_eq!(Action::On.to_string(), "ON");
        assert_eq!(Action::Auto.to_string(), "AUTO");
        assert_eq!("MANUAL".parse::<Action>().unwrap(), Action::Manual);
        assert!("BOGUS".parse::<Action>().is_err());
    }

    #[test]
    fn unmapped_codes_have_no_label() {
        assert_eq!(scalar_label(ValueClass::Switch, 3), Some("On"));
        assert_eq!(scalar_label(ValueClass::Switch, 99), None);
        assert_eq!(scalar_label(ValueClass::Cover, 5), None);
    }

    #[test]
    fn ph_target_range_is_narrow() {
        let spec = target_spec("pH").unwrap();
        assert!(spec.min <= 7.2 && 7.2 <= spec.max);
        assert!(9.9 > spec.max);
        assert_eq!(spec.step, Some(0.1));
        // Wire names are case-sensitive.
        assert!(target_spec("ph").is_none());
    }
}

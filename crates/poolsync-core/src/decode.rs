// ── Raw value interpretation ──
//
// Turns wire values into `DecodedState`s using the catalog's metadata.
// Decoding is total: every raw value produces a state, with values the
// tables cannot place marked unmapped rather than dropped. It is also
// deterministic -- the same raw value always yields the same state, so
// repeated polls cannot flap a key's meaning.

use chrono::Utc;
use indexmap::IndexMap;
use poolsync_api::{Readings, TelemetryValue};
use tracing::debug;

use crate::catalog::{self, DecodeKind, ValueClass};
use crate::model::{
    ArrayState, CompositeState, DecodedState, DeviceIdentity, ScalarState, Snapshot,
};

/// Text shown for an empty condition list.
const NO_ISSUES: &str = "no issues";

/// Decode one telemetry value.
///
/// The decode kind comes from the catalog when the key is known;
/// uncataloged values fall back by shape (lists to `Array`, text to
/// `Composite`, numbers to `Scalar`) under the `Generic` class.
#[must_use]
pub fn decode_value(key: &str, value: &TelemetryValue) -> DecodedState {
    // Lists are condition reports no matter what the catalog says about
    // the key; the firmware uses one shape for them everywhere.
    if let TelemetryValue::List(items) = value {
        return decode_array(items);
    }

    match catalog::function_spec(key) {
        Some(spec) => match spec.decode {
            DecodeKind::Scalar => decode_scalar(spec.class, value),
            DecodeKind::Composite => decode_composite(spec.class, value),
            // Covered by the list check above; a non-list value on an
            // array key is an anomaly preserved as composite text.
            DecodeKind::Array => decode_composite(spec.class, value),
        },
        None if catalog::is_condition_list(key) => decode_composite(ValueClass::Generic, value),
        None => match value {
            TelemetryValue::Number(_) => decode_scalar(ValueClass::Generic, value),
            TelemetryValue::Text(_) | TelemetryValue::List(_) => {
                decode_composite(ValueClass::Generic, value)
            }
        },
    }
}

/// Whether a readings entry is state-like enough to decode.
///
/// Cataloged keys always decode. Beyond those, lists and
/// composite-shaped text decode under the fallback class; measurements
/// (plain numbers, version strings) stay raw-only.
#[must_use]
pub fn is_decodable(key: &str, value: &TelemetryValue) -> bool {
    if catalog::function_spec(key).is_some() || catalog::is_condition_list(key) {
        return true;
    }
    match value {
        TelemetryValue::List(_) => true,
        // Only genuinely composite-shaped text; bare digit strings are
        // counters and runtimes, not states.
        TelemetryValue::Text(text) => text.contains('|') && split_composite(text).is_some(),
        TelemetryValue::Number(_) => false,
    }
}

fn decode_scalar(class: ValueClass, value: &TelemetryValue) -> DecodedState {
    match extract_code(value) {
        Some(code) => DecodedState::Scalar(ScalarState {
            class,
            code,
            is_active: catalog::active_codes(class).contains(&code),
            label: catalog::scalar_label(class, code),
        }),
        // Not an integer at all; keep the raw rendering as an unmapped
        // composite so nothing is silently dropped.
        None => anomaly(class, value),
    }
}

fn decode_composite(class: ValueClass, value: &TelemetryValue) -> DecodedState {
    if let Some(code) = extract_code(value) {
        return DecodedState::Composite(CompositeState {
            class,
            code: Some(code),
            is_active: catalog::active_codes(class).contains(&code),
            label: catalog::scalar_label(class, code),
            detail: None,
            detail_readable: None,
        });
    }
    if let TelemetryValue::Text(text) = value {
        if let Some((code, detail)) = split_composite(text) {
            return DecodedState::Composite(CompositeState {
                class,
                code: Some(code),
                is_active: catalog::active_codes(class).contains(&code),
                label: catalog::scalar_label(class, code),
                detail: detail.map(str::to_owned),
                detail_readable: detail.map(humanize_token),
            });
        }
    }
    anomaly(class, value)
}

fn decode_array(items: &[String]) -> DecodedState {
    DecodedState::Array(ArrayState {
        items: items.to_vec(),
        has_issues: !items.is_empty(),
        detail_readable: if items.is_empty() {
            NO_ISSUES.to_owned()
        } else {
            items.join(", ")
        },
    })
}

/// Unplaceable value: no code, inactive, raw text carried as detail.
fn anomaly(class: ValueClass, value: &TelemetryValue) -> DecodedState {
    let raw = value.to_string();
    DecodedState::Composite(CompositeState {
        class,
        code: None,
        is_active: false,
        label: None,
        detail_readable: Some(humanize_token(&raw)),
        detail: Some(raw),
    })
}

/// Integer state code from a raw value, accepting numeric text.
fn extract_code(value: &TelemetryValue) -> Option<i64> {
    match value {
        TelemetryValue::Number(_) => value.as_integer(),
        TelemetryValue::Text(text) => {
            let text = text.trim();
            if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            text.parse().ok()
        }
        TelemetryValue::List(_) => None,
    }
}

/// Split `<int>|<DETAIL>` text into its parts.
///
/// The scan is strict about the leading integer but keeps everything
/// after the first pipe verbatim, pipes included. Text that is not
/// digits-then-pipe yields `None`.
fn split_composite(text: &str) -> Option<(i64, Option<&str>)> {
    let text = text.trim();
    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if digits_end == 0 {
        return None;
    }
    let code: i64 = text[..digits_end].parse().ok()?;
    let rest = &text[digits_end..];
    if rest.is_empty() {
        return Some((code, None));
    }
    let detail = rest.strip_prefix('|')?.trim();
    Some((code, (!detail.is_empty()).then_some(detail)))
}

/// Render a firmware token for humans: `PUMP_ANTI_FREEZE` becomes
/// `Pump Anti Freeze`.
///
/// Token spellings are preserved as-is beyond casing; the firmware's
/// own names are what users see in its web UI too.
#[must_use]
pub fn humanize_token(token: &str) -> String {
    token
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let lower = word.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Snapshot assembly ────────────────────────────────────────────────

/// Build a complete snapshot from one successful full-state read.
///
/// Every decodable key is interpreted; unmapped values are logged as
/// anomalies but still land in the snapshot, inactive.
#[must_use]
pub fn build_snapshot(host: &str, cycle: u64, readings: Readings) -> Snapshot {
    let mut decoded = IndexMap::with_capacity(readings.len());
    for (key, value) in &readings {
        if !is_decodable(key, value) {
            continue;
        }
        let state = decode_value(key, value);
        if !state.is_mapped() {
            debug!(key, raw = %value, "value outside the known state tables");
        }
        decoded.insert(key.clone(), state);
    }

    let identity = DeviceIdentity {
        host: host.to_owned(),
        firmware: readings
            .get(catalog::FIRMWARE_KEY)
            .and_then(TelemetryValue::as_text)
            .map(str::to_owned),
        serial: readings
            .get(catalog::SERIAL_KEY)
            .and_then(TelemetryValue::as_text)
            .map(str::to_owned),
    };

    Snapshot {
        taken_at: Utc::now(),
        cycle,
        identity,
        readings,
        decoded,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn text(s: &str) -> TelemetryValue {
        TelemetryValue::Text(s.to_owned())
    }

    fn list(items: &[&str]) -> TelemetryValue {
        TelemetryValue::List(items.iter().map(|s| (*s).to_owned()).collect())
    }

    #[test]
    fn composite_with_detail_token() {
        let state = decode_value("PUMP", &text("3|PUMP_ANTI_FREEZE"));
        assert_eq!(state.is_active(), Some(true));
        assert_eq!(state.code(), Some(3));
        assert_eq!(state.detail(), Some("PUMP_ANTI_FREEZE"));
        assert_eq!(state.detail_readable(), Some("Pump Anti Freeze"));
        assert!(state.is_mapped());
    }

    #[test]
    fn composite_without_detail() {
        let state = decode_value("PUMP", &TelemetryValue::Number(1.0));
        assert_eq!(state.is_active(), Some(true));
        assert_eq!(state.detail(), None);
        assert_eq!(state.to_string(), "Auto (on)");
    }

    #[test]
    fn scalar_codes_follow_class_tables() {
        assert_eq!(
            decode_value("ECO", &TelemetryValue::Number(0.0)).is_active(),
            Some(false)
        );
        assert_eq!(
            decode_value("ECO", &TelemetryValue::Number(4.0)).is_active(),
            Some(true)
        );
        // Dosing pumps treat 4 as outside the table.
        let dosing = decode_value("DOS_1_CL", &TelemetryValue::Number(4.0));
        assert_eq!(dosing.is_active(), Some(false));
        assert!(!dosing.is_mapped());
    }

    #[test]
    fn unmapped_code_is_inactive_but_kept() {
        let state = decode_value("ECO", &TelemetryValue::Number(99.0));
        assert_eq!(state.code(), Some(99));
        assert_eq!(state.is_active(), Some(false));
        assert!(!state.is_mapped());
        assert_eq!(state.to_string(), "state 99");
    }

    #[test]
    fn empty_condition_list_reads_clean() {
        let state = decode_value("OVERFLOW_REFILL_STATE", &list(&[]));
        assert_eq!(state.has_issues(), Some(false));
        assert_eq!(state.detail_readable(), Some("no issues"));
    }

    #[test]
    fn populated_condition_list_keeps_tokens() {
        let state = decode_value(
            "OVERFLOW_REFILL_STATE",
            &list(&["BLOCKED_BY_TRESHOLDS", "TRESHOLDS_REACHED"]),
        );
        assert_eq!(state.has_issues(), Some(true));
        match &state {
            DecodedState::Array(a) => assert_eq!(a.items.len(), 2),
            other => panic!("unexpected decode: {other:?}"),
        }
        assert_eq!(
            state.detail_readable(),
            Some("BLOCKED_BY_TRESHOLDS, TRESHOLDS_REACHED")
        );
    }

    #[test]
    fn decoding_is_deterministic() {
        let value = text("4|FROST_PROTECTION");
        assert_eq!(decode_value("SOLAR", &value), decode_value("SOLAR", &value));
        let value = list(&["A", "B"]);
        assert_eq!(
            decode_value("SOMETHING", &value),
            decode_value("SOMETHING", &value)
        );
    }

    #[test]
    fn uncataloged_values_fall_back_by_shape() {
        let number = decode_value("MYSTERY_STATE", &TelemetryValue::Number(1.0));
        assert_eq!(number.is_active(), Some(true));

        let tokens = decode_value("MYSTERY_LIST", &list(&["X"]));
        assert_eq!(tokens.has_issues(), Some(true));

        let composite = decode_value("MYSTERY_TEXT", &text("2|FROST"));
        assert_eq!(composite.code(), Some(2));
        assert_eq!(composite.is_active(), Some(false));
        assert_eq!(composite.detail_readable(), Some("Frost"));
    }

    #[test]
    fn garbled_values_become_unmapped_anomalies() {
        let state = decode_value("PUMP", &text("WEIRD"));
        assert_eq!(state.code(), None);
        assert_eq!(state.is_active(), Some(false));
        assert!(!state.is_mapped());
        assert_eq!(state.detail(), Some("WEIRD"));

        let fraction = decode_value("ECO", &TelemetryValue::Number(2.5));
        assert_eq!(fraction.code(), None);
        assert!(!fraction.is_mapped());
        assert_eq!(fraction.detail(), Some("2.5"));
    }

    #[test]
    fn humanizer_title_cases_tokens() {
        assert_eq!(humanize_token("PUMP_ANTI_FREEZE"), "Pump Anti Freeze");
        assert_eq!(humanize_token("TRESHOLDS_REACHED"), "Tresholds Reached");
        assert_eq!(humanize_token("FROST"), "Frost");
        assert_eq!(humanize_token("SCENE_2"), "Scene 2");
    }

    #[test]
    fn numeric_text_counts_as_a_code() {
        let state = decode_value("ECO", &text("3"));
        assert_eq!(state.code(), Some(3));
        assert_eq!(state.is_active(), Some(true));
    }

    #[test]
    fn snapshot_decodes_states_and_skips_measurements() {
        let mut readings = Readings::new();
        readings.insert("FW".into(), text("1.40.1"));
        readings.insert("SERIAL".into(), text("PC-2141"));
        readings.insert("WATER_TEMP".into(), TelemetryValue::Number(24.3));
        readings.insert("PUMP".into(), text("3|PUMP_ANTI_FREEZE"));
        readings.insert("ECO".into(), TelemetryValue::Number(0.0));
        readings.insert("OVERFLOW_REFILL_STATE".into(), list(&[]));

        let snapshot = build_snapshot("192.168.1.50", 1, readings);

        assert_eq!(snapshot.cycle, 1);
        assert_eq!(snapshot.identity.host, "192.168.1.50");
        assert_eq!(snapshot.identity.firmware.as_deref(), Some("1.40.1"));
        assert_eq!(snapshot.identity.serial.as_deref(), Some("PC-2141"));

        // Raw values survive untouched, in device order.
        assert_eq!(snapshot.readings.len(), 6);
        let keys: Vec<&str> = snapshot.readings.keys().map(String::as_str).collect();
        assert_eq!(keys[2], "WATER_TEMP");

        // Measurements and identity strings are raw-only.
        assert!(snapshot.decoded("WATER_TEMP").is_none());
        assert!(snapshot.decoded("FW").is_none());

        assert_eq!(snapshot.is_active("PUMP"), Some(true));
        assert_eq!(snapshot.is_active("ECO"), Some(false));
        assert_eq!(
            snapshot.decoded("OVERFLOW_REFILL_STATE").and_then(DecodedState::has_issues),
            Some(false)
        );
    }
}

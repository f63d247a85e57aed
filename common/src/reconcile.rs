use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::schedule::TimeOfDay;

/// Absolute tolerance for numeric comparison; device firmware echoes
/// setpoints with more precision than the config file writes them.
const NUMERIC_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub expected: Value,
    /// `None` when the device did not report the key at all.
    pub reported: Option<Value>,
}

/// Keyed by payload field name; `BTreeMap` keeps the report order
/// deterministic.
pub type MismatchReport = BTreeMap<String, Mismatch>;

/// Compares an expected configuration against a device's reported state.
/// Only expected keys drive the report; extra reported keys are the
/// device's own business. A reported value that is not a JSON object (the
/// device never sent parseable state) mismatches every expected key.
pub fn reconcile(expected: &Map<String, Value>, reported: Option<&Value>) -> MismatchReport {
    let reported = reported.and_then(Value::as_object);

    let mut report = MismatchReport::new();
    for (key, want) in expected {
        let got = reported.and_then(|fields| fields.get(key));
        match got {
            Some(got) if values_match(want, got) => {}
            _ => {
                report.insert(
                    key.clone(),
                    Mismatch {
                        expected: want.clone(),
                        reported: got.cloned(),
                    },
                );
            }
        }
    }
    report
}

/// Ordered comparator chain. Each comparator returns `None` when the value
/// shapes don't apply to it; the first applicable comparator decides.
/// Strict equality is the fallback.
fn values_match(expected: &Value, reported: &Value) -> bool {
    let comparators = [compare_numbers, compare_schedules, compare_strings];
    for comparator in comparators {
        if let Some(equal) = comparator(expected, reported) {
            return equal;
        }
    }
    expected == reported
}

fn as_decimal(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn compare_numbers(expected: &Value, reported: &Value) -> Option<bool> {
    let (a, b) = (as_decimal(expected)?, as_decimal(reported)?);
    Some((a - b).abs() <= NUMERIC_TOLERANCE)
}

fn compare_schedules(expected: &Value, reported: &Value) -> Option<bool> {
    let a = schedule_tokens(expected.as_str()?)?;
    let b = schedule_tokens(reported.as_str()?)?;

    Some(
        a.len() == b.len()
            && a.iter().zip(&b).all(|((ta, va), (tb, vb))| {
                // Times must match exactly as strings; temperatures after
                // canonicalizing the decimal form.
                ta == tb && canonical_decimal(va) == canonical_decimal(vb)
            }),
    )
}

fn compare_strings(expected: &Value, reported: &Value) -> Option<bool> {
    let (a, b) = (expected.as_str()?, reported.as_str()?);
    Some(collapse_whitespace(a) == collapse_whitespace(b))
}

/// `(time, temperature)` token pairs, or `None` if the text is not a
/// schedule string (any token that isn't `HH:MM/temp` disqualifies it).
fn schedule_tokens(text: &str) -> Option<Vec<(&str, &str)>> {
    let mut tokens = Vec::new();
    for token in text.split_whitespace() {
        let (time, temperature) = token.split_once('/')?;
        if time.parse::<TimeOfDay>().is_err() || temperature.parse::<f64>().is_err() {
            return None;
        }
        tokens.push((time, temperature));
    }
    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}

/// Strips insignificant trailing zeros: "24.0" and "24" are the same
/// temperature token.
fn canonical_decimal(token: &str) -> &str {
    if token.contains('.') {
        token.trim_end_matches('0').trim_end_matches('.')
    } else {
        token
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatteryStatus {
    /// The device raised its low-battery flag.
    Low,
    /// Battery level reported below the configured threshold.
    Level(f64),
    /// No battery information in the reported state at all.
    Unknown,
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "battery low"),
            Self::Level(level) => write!(f, "battery at {level}%"),
            Self::Unknown => write!(f, "battery unknown"),
        }
    }
}

/// Battery annotation for a reported state, independent of the mismatch
/// computation. `None` means the battery looks fine.
pub fn battery_status(reported: Option<&Value>, threshold: f64) -> Option<BatteryStatus> {
    let fields = match reported.and_then(Value::as_object) {
        Some(fields) => fields,
        None => return Some(BatteryStatus::Unknown),
    };

    let low = fields.get("battery_low").and_then(Value::as_bool);
    let level = fields.get("battery").and_then(as_decimal);

    match (low, level) {
        (Some(true), _) => Some(BatteryStatus::Low),
        (_, Some(level)) if level < threshold => Some(BatteryStatus::Level(level)),
        (None, None) => Some(BatteryStatus::Unknown),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn expected() -> Map<String, Value> {
        json!({
            "system_mode": "heat",
            "temperature_sensitivity": 0.5,
            "schedule_monday": "00:00/19 05:00/21 23:00/19",
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn identical_state_yields_an_empty_report() {
        let payload = expected();
        let reported = Value::Object(payload.clone());

        assert!(reconcile(&payload, Some(&reported)).is_empty());
    }

    #[test]
    fn numbers_compare_within_tolerance() {
        let payload = json!({"t": 21.0}).as_object().unwrap().clone();

        let close = json!({"t": "21.0000005"});
        assert!(reconcile(&payload, Some(&close)).is_empty());

        let off = json!({"t": 22.0});
        let report = reconcile(&payload, Some(&off));
        assert_eq!(report["t"].reported, Some(json!(22.0)));
    }

    #[test]
    fn schedule_strings_compare_canonically() {
        let payload = json!({"s": "06:00/21.0"}).as_object().unwrap().clone();

        assert!(reconcile(&payload, Some(&json!({"s": "06:00/21"}))).is_empty());
        assert!(!reconcile(&payload, Some(&json!({"s": "06:30/21"}))).is_empty());
        assert!(!reconcile(&payload, Some(&json!({"s": "06:00/21 07:00/21"}))).is_empty());
    }

    #[test]
    fn schedule_times_must_match_as_strings() {
        let payload = json!({"s": "06:00/21"}).as_object().unwrap().clone();

        // 6:00 parses to the same minute but is not the same string.
        assert!(!reconcile(&payload, Some(&json!({"s": "6:00/21"}))).is_empty());
    }

    #[test]
    fn plain_strings_compare_with_collapsed_whitespace() {
        let payload = json!({"mode": "heat  pump"}).as_object().unwrap().clone();

        assert!(reconcile(&payload, Some(&json!({"mode": " heat pump "}))).is_empty());
        assert!(!reconcile(&payload, Some(&json!({"mode": "heatpump"}))).is_empty());
    }

    #[test]
    fn everything_else_compares_strictly() {
        let payload = json!({"on": true}).as_object().unwrap().clone();

        assert!(reconcile(&payload, Some(&json!({"on": true}))).is_empty());
        assert!(!reconcile(&payload, Some(&json!({"on": false}))).is_empty());
    }

    #[test]
    fn missing_keys_are_reported_as_absent() {
        let payload = expected();
        let reported = json!({"system_mode": "heat"});

        let report = reconcile(&payload, Some(&reported));
        assert_eq!(report.len(), 2);
        assert_eq!(report["schedule_monday"].reported, None);
        assert_eq!(report["temperature_sensitivity"].reported, None);
    }

    #[test]
    fn unparseable_state_mismatches_every_key() {
        let payload = expected();

        for reported in [None, Some(json!("ERR: offline")), Some(json!(42))] {
            let report = reconcile(&payload, reported.as_ref());
            assert_eq!(report.len(), payload.len(), "{reported:?}");
            assert!(report.values().all(|mismatch| mismatch.reported.is_none()));
        }
    }

    #[test]
    fn extra_reported_keys_are_ignored() {
        let payload = json!({"system_mode": "heat"}).as_object().unwrap().clone();
        let reported = json!({"system_mode": "heat", "linkquality": 87});

        assert!(reconcile(&payload, Some(&reported)).is_empty());
    }

    #[test]
    fn report_iterates_keys_in_ascending_order() {
        let payload = json!({"zz": 1, "aa": 2, "mm": 3}).as_object().unwrap().clone();

        let report = reconcile(&payload, None);
        let keys: Vec<_> = report.keys().cloned().collect();
        assert_eq!(keys, ["aa", "mm", "zz"]);
    }

    #[test]
    fn battery_annotation_branches() {
        let threshold = 20.0;

        let flagged = json!({"battery_low": true, "battery": 80});
        assert_eq!(
            battery_status(Some(&flagged), threshold),
            Some(BatteryStatus::Low)
        );

        let weak = json!({"battery_low": false, "battery": 12});
        assert_eq!(
            battery_status(Some(&weak), threshold),
            Some(BatteryStatus::Level(12.0))
        );

        let healthy = json!({"battery": 95});
        assert_eq!(battery_status(Some(&healthy), threshold), None);

        let flag_only = json!({"battery_low": false});
        assert_eq!(battery_status(Some(&flag_only), threshold), None);

        let no_info = json!({"linkquality": 87});
        assert_eq!(
            battery_status(Some(&no_info), threshold),
            Some(BatteryStatus::Unknown)
        );

        assert_eq!(
            battery_status(None, threshold),
            Some(BatteryStatus::Unknown)
        );
        assert_eq!(
            battery_status(Some(&json!("raw")), threshold),
            Some(BatteryStatus::Unknown)
        );
    }
}

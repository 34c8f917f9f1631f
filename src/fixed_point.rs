// =============================================================================
// Base-18 fixed-point conversions
// =============================================================================
//
// The exchange encodes every price, quantity and PnL as an integer scaled by
// 10^18 and serialised as a decimal string. Values are converted once at the
// edge; the rest of the bot works in plain f64.
// =============================================================================

use serde_json::Value;

/// 10^18 as a float divisor.
pub const SCALE: f64 = 1e18;

/// Parse a raw base-18 string (`"1500000000000000000"` → 1.5).
///
/// Returns `None` for anything that is not an integer string.
pub fn from_base18(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<i128>().ok().map(|v| v as f64 / SCALE)
}

/// Convert a display value into its raw base-18 string.
pub fn to_base18(value: f64) -> String {
    let scaled = (value * SCALE).round();
    (scaled as i128).to_string()
}

/// Read a base-18 field from a JSON record. Accepts strings and plain
/// numbers; anything else is treated as absent.
///
/// Raw values beyond `u64::MAX` (about 18.4 units) arrive from serde_json as
/// floats, so the float accessor is the last fallback.
pub fn field(record: &Value, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::String(s) => from_base18(s),
        Value::Number(n) => n
            .as_i64()
            .map(|v| v as f64 / SCALE)
            .or_else(|| n.as_u64().map(|v| v as f64 / SCALE))
            .or_else(|| n.as_f64().map(|v| v / SCALE))
            .filter(|v| v.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trips(x: f64) -> bool {
        let back = from_base18(&to_base18(x)).unwrap();
        (back - x).abs() <= x.abs() * 1e-12
    }

    #[test]
    fn round_trip_representative_values() {
        assert!(round_trips(1.5));
        assert!(round_trips(0.000001));
        assert!(round_trips(100.0));
    }

    #[test]
    fn parses_raw_strings() {
        assert_eq!(from_base18("1500000000000000000"), Some(1.5));
        assert_eq!(from_base18("0"), Some(0.0));
        assert_eq!(from_base18("-50000000000000000"), Some(-0.05));
        assert_eq!(from_base18(""), None);
        assert_eq!(from_base18("1.5"), None);
    }

    #[test]
    fn field_accepts_strings_and_integers() {
        let rec = json!({ "a": "2000000000000000000", "b": 0, "c": null });
        assert_eq!(field(&rec, "a"), Some(2.0));
        assert_eq!(field(&rec, "b"), Some(0.0));
        assert_eq!(field(&rec, "c"), None);
        assert_eq!(field(&rec, "missing"), None);
    }

    #[test]
    fn field_reads_numbers_beyond_u64_range() {
        let rec = json!({ "big": 25e18 });
        assert!((field(&rec, "big").unwrap() - 25.0).abs() < 1e-9);

        let parsed: Value = serde_json::from_str(r#"{ "quantity": 20000000000000000000 }"#).unwrap();
        assert!((field(&parsed, "quantity").unwrap() - 20.0).abs() < 1e-9);
    }
}

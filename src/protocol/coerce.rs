//! Numeric coercion of outgoing payloads.
//!
//! Firmware on the other end of the link usually parses numbers only, while
//! host-side values often come from text inputs. When enabled, every string
//! in an outgoing payload that reads as a number is sent as a JSON number.
//!
//! A string is numeric when, after trimming surrounding whitespace, it is
//! non-empty and parses completely as a decimal integer or as a finite
//! decimal float. Integers stay integers (`"2"` → `2`, never `2.0`).
//! Partial numbers (`"12abc"`), hexadecimal (`"0x10"`) and the spellings of
//! infinity and NaN are left as strings.

use serde_json::{Number, Value};

/// Recursively replace numeric-looking strings with numbers.
///
/// Arrays are mapped element-wise and objects keep their keys; every other
/// value is returned unchanged.
#[must_use]
pub fn coerce_numeric(value: Value) -> Value {
    match value {
        Value::String(text) => match parse_numeric(&text) {
            Some(number) => Value::Number(number),
            None => Value::String(text),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_numeric).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, coerce_numeric(item)))
                .collect(),
        ),
        other => other,
    }
}

/// Parse `raw` as a JSON number if it is entirely numeric.
#[must_use]
pub fn parse_numeric(raw: &str) -> Option<Number> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(int) = text.parse::<i64>() {
        return Some(int.into());
    }
    if let Ok(uint) = text.parse::<u64>() {
        return Some(uint.into());
    }

    // `f64::from_str` also accepts "inf" and "NaN".
    let decimal = text
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !decimal {
        return None;
    }

    text.parse::<f64>().ok().and_then(Number::from_f64)
}

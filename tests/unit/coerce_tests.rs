//! Unit tests for numeric coercion of outgoing payloads.

use serde_json::{json, Value};

use serial_events::protocol::{coerce_numeric, parse_numeric};

#[test]
fn nested_object_and_array_are_coerced() {
    let coerced = coerce_numeric(json!({"a": "3.5", "b": ["2", "x"]}));
    assert_eq!(coerced, json!({"a": 3.5, "b": [2, "x"]}));
}

#[test]
fn integral_strings_encode_without_fraction() {
    let coerced = coerce_numeric(json!(["2", "-40", "18446744073709551615"]));
    assert_eq!(coerced.to_string(), "[2,-40,18446744073709551615]");
}

#[test]
fn non_string_values_pass_through() {
    let payload = json!({"flag": true, "none": null, "n": 7, "f": 1.25});
    assert_eq!(coerce_numeric(payload.clone()), payload);
}

#[test]
fn non_numeric_strings_are_kept() {
    let payload = json!(["12abc", "0x10", "", " ", "NaN", "Infinity", "1,5", "on"]);
    assert_eq!(coerce_numeric(payload.clone()), payload);
}

#[test]
fn whitespace_around_a_number_is_trimmed() {
    assert_eq!(coerce_numeric(json!(" 42 ")), json!(42));
}

#[test]
fn deeply_nested_values_are_reached() {
    let coerced = coerce_numeric(json!({"outer": {"inner": [["1"], {"v": "2.5"}]}}));
    assert_eq!(coerced, json!({"outer": {"inner": [[1], {"v": 2.5}]}}));
}

#[test]
fn object_keys_are_never_coerced() {
    let coerced = coerce_numeric(json!({"1": "one"}));
    let Value::Object(map) = coerced else {
        panic!("object must stay an object");
    };
    assert_eq!(map.get("1"), Some(&json!("one")));
}

#[test]
fn exponent_and_sign_forms_parse() {
    assert_eq!(parse_numeric("+5"), Some(5.into()));
    assert_eq!(parse_numeric("-2.5e2").and_then(|n| n.as_f64()), Some(-250.0));
    assert_eq!(parse_numeric("5."), serde_json::Number::from_f64(5.0));
}

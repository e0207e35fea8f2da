//! Coerce — numeric/string conversions applied to captured field values.
//!
//! Captures are loosely typed: a capture that reads as a number becomes a
//! number, and field type hints can force either direction. None of these
//! helpers fail; a value that cannot be converted keeps its prior form or,
//! for a forced number, becomes zero.

use serde_json::{Number, Value};

/// Interpret `raw` as a numeric literal.
///
/// Accepts surrounding whitespace, a sign, decimals, exponents and
/// `0x`/`0o`/`0b` integer prefixes. A whitespace-only string reads as zero.
/// Non-finite results are rejected so every accepted value is representable
/// in JSON.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return Some(0.0);
    }

    let radix = match s.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return u64::from_str_radix(&s[2..], radix).ok().map(|n| n as f64);
    }

    // f64::from_str also accepts "inf"/"nan" spellings; only plain decimal
    // literals qualify here.
    let plain = s
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !plain || !s.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }

    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// JSON number for `n`: integral values within the exact `f64` range become
/// integers, everything else stays floating point.
pub fn number_value(n: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    if n.fract() == 0.0 && n.abs() <= MAX_EXACT {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// Coerce a captured string into a number, if it reads as one.
pub fn numeric_capture(raw: &str) -> Value {
    if !raw.is_empty() {
        if let Some(n) = parse_numeric(raw) {
            return number_value(n);
        }
    }
    Value::String(raw.to_string())
}

/// Forced numeric conversion for `number`-typed fields. Anything that does
/// not read as a number becomes zero.
pub fn force_number(raw: &str) -> Value {
    if raw.is_empty() {
        return number_value(0.0);
    }
    number_value(parse_numeric(raw).unwrap_or(0.0))
}

/// String form of a value, as used for hashing and date parsing.
pub fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => number_to_string(n),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

pub fn number_to_string(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Truthiness of an attribute value: empty strings, zero, `false` and
/// `null` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

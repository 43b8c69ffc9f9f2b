//! JSON-level sanitization shared by tool results and script output.
//!
//! The interpreter strips functions, `undefined` and cycles while it turns
//! script values into JSON. What is left to do on plain JSON is number
//! normalization and depth clamping, and both must be idempotent so a
//! sanitized value can be sanitized again without changing.

use serde_json::{Map, Number, Value};

/// Maximum nesting depth of JSON crossing the enclave boundary.
pub const MAX_JSON_DEPTH: usize = 128;

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Convert a script number into JSON.
///
/// `NaN` and infinities become `null`, integral values that fit in `i64`
/// or `u64` become integers, and `-0` becomes `0`.
pub fn number_to_json(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 {
        // 2^63 and 2^64 are exact in f64, so these bounds cast losslessly.
        if n >= i64::MIN as f64 && n < 9_223_372_036_854_775_808.0 {
            return Value::Number(Number::from(n as i64));
        }
        if n > 0.0 && n < 18_446_744_073_709_551_616.0 {
            return Value::Number(Number::from(n as u64));
        }
    }
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}

/// Normalize numbers and replace anything nested deeper than `max_depth`
/// with `null`.
pub fn sanitize_json(value: Value, max_depth: usize) -> Value {
    sanitize_at(value, 0, max_depth)
}

fn sanitize_at(value: Value, depth: usize, max_depth: usize) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if !n.is_i64() && !n.is_u64() => number_to_json(f),
            Some(f) if f.abs() > MAX_SAFE_INTEGER => number_to_json(f),
            _ => Value::Number(n),
        },
        Value::Array(_) | Value::Object(_) if depth >= max_depth => Value::Null,
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| sanitize_at(v, depth + 1, max_depth))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, sanitize_at(v, depth + 1, max_depth));
            }
            Value::Object(out)
        }
        other => other,
    }
}

/// Serialized size of a JSON value in bytes.
pub fn json_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(usize::MAX)
}

//! Pure value-conversion helpers used by validation and dispatch.
//!
//! Coercers are best-effort: they return `Some(converted)` on success and
//! `None` when the value cannot be converted, leaving the original in place
//! for the validator to reject with a normal type error. They never panic.

use serde_json::{Number, Value};

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce to an integer: numbers are floored, numeric strings are parsed
/// then floored.
pub fn coerce_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n.as_f64().map(|f| Value::from(f.floor() as i64)),
        Value::String(s) => {
            let parsed: f64 = s.trim().parse().ok()?;
            parsed.is_finite().then(|| Value::from(parsed.floor() as i64))
        }
        _ => None,
    }
}

/// Coerce to a number: numeric strings are parsed.
pub fn coerce_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => {
            let parsed: f64 = s.trim().parse().ok()?;
            Number::from_f64(parsed).map(Value::Number)
        }
        _ => None,
    }
}

/// Coerce to a string: numbers and booleans are stringified. Arrays and
/// objects are left alone.
pub fn coerce_string(value: &Value) -> Option<Value> {
    match value {
        Value::String(_) => Some(value.clone()),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

/// Coerce to a boolean: accepts truthy/falsy strings.
pub fn coerce_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Some(Value::Bool(true)),
            "false" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

/// Coerce to an array: a non-array value is wrapped into a single-element
/// array. Never unwraps in the other direction.
pub fn coerce_array(value: &Value) -> Option<Value> {
    match value {
        Value::Array(_) => Some(value.clone()),
        other => Some(Value::Array(vec![other.clone()])),
    }
}

/// Coerce to an object: strings are parsed as JSON and must parse to an
/// object.
pub fn coerce_object(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => Some(parsed),
            _ => None,
        },
        _ => None,
    }
}

/// Remove top-level entries whose value is null.
///
/// Applied to caller params before validation so explicit nulls behave like
/// absent fields.
pub fn strip_nulls(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|_, v| !v.is_null());
    }
}

/// Element count of a value after array-coercion semantics: arrays count
/// their elements, anything else counts as one.
pub fn element_count(value: &Value) -> usize {
    match value {
        Value::Array(arr) => arr.len(),
        _ => 1,
    }
}

/// Render a value as the wire string the job endpoint expects: strings pass
/// through unquoted, other scalars stringify, objects and arrays become JSON
/// text.
pub fn wire_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Extract a list of strings, accepting either a single string or an array
/// of strings and ignoring anything else.
pub fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(arr) => arr
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

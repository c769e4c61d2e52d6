//! Structural helpers over `serde_json::Value`.

use lorekeep_core::normalize_key;
use serde_json::Value;

/// Fields tried, in order, to identify a record inside an array.
const IDENTITY_FIELDS: [&str; 4] = ["name", "id", "title", "key"];

/// Structural equality.
///
/// Differs from `==` on numbers only: `1` and `1.0` are equal. Object key
/// order never matters; array order does.
pub fn structural_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| structural_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| structural_eq(x, y)))
        }
        _ => a == b,
    }
}

/// Null, bool, number, or string.
pub fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Identity of a record inside an array: the normalized text of its first
/// present `name`/`id`/`title`/`key` field.
pub fn record_key(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    IDENTITY_FIELDS.iter().find_map(|field| {
        let key = match object.get(*field)? {
            Value::String(s) => normalize_key(s),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!key.is_empty()).then_some(key)
    })
}

/// Identity of an open question: bare string or `{question, ...}` record.
pub fn question_key(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.as_str(),
        Value::Object(o) => o.get("question")?.as_str()?,
        _ => return None,
    };
    let key = normalize_key(text);
    (!key.is_empty()).then_some(key)
}

/// Push `value` unless a structurally equal one is already present.
pub(crate) fn push_unique(list: &mut Vec<Value>, value: &Value) {
    if !list.iter().any(|v| structural_eq(v, value)) {
        list.push(value.clone());
    }
}

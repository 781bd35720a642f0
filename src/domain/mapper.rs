//! Copy-if-present helpers between the flat view model and nested settings.
//!
//! Empty values (missing, null, `""`, `[]`, `{}`) are never written, so
//! settings documents stay free of explicit defaults.

use serde_json::{Map, Value};

pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
        Some(_) => true,
    }
}

pub fn copy(source: &Map<String, Value>, target: &mut Map<String, Value>, field: &str) {
    copy_as(source, field, target, field, |value| Some(value.clone()))
}

pub fn copy_with<F>(source: &Map<String, Value>, target: &mut Map<String, Value>, field: &str, convert: F)
where
    F: Fn(&Value) -> Option<Value>,
{
    copy_as(source, field, target, field, convert)
}

/// Copies `source[from]` into `target[to]`. A converter returning `None`
/// (or an empty value) leaves the target untouched.
pub fn copy_as<F>(
    source: &Map<String, Value>,
    from: &str,
    target: &mut Map<String, Value>,
    to: &str,
    convert: F,
) where
    F: Fn(&Value) -> Option<Value>,
{
    let value = source.get(from);
    if !is_present(value) {
        return;
    }
    if let Some(converted) = value.and_then(convert) {
        if is_present(Some(&converted)) {
            target.insert(to.to_string(), converted);
        }
    }
}

/// Runs `fill` against a fresh object and attaches it as `target[key]`
/// only if something was written, merging into an existing object.
pub fn nested<F>(target: &mut Map<String, Value>, key: &str, fill: F)
where
    F: FnOnce(&mut Map<String, Value>),
{
    let mut child = match target.remove(key) {
        Some(Value::Object(existing)) => existing,
        Some(other) => {
            target.insert(key.to_string(), other);
            return;
        }
        None => Map::new(),
    };
    fill(&mut child);
    if !child.is_empty() {
        target.insert(key.to_string(), Value::Object(child));
    }
}

/// Walks an object path, returning `None` as soon as a segment is missing
/// or not an object.
pub fn object_at<'a>(root: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Map<String, Value>> {
    path.iter()
        .try_fold(root, |current, segment| current.get(*segment).and_then(Value::as_object))
}

pub fn object_at_mut<'a>(root: &'a mut Map<String, Value>, path: &[&str]) -> Option<&'a mut Map<String, Value>> {
    path.iter()
        .try_fold(root, |current, segment| current.get_mut(*segment).and_then(Value::as_object_mut))
}

/// Converters shared by the schema tables.
pub mod convert {
    use serde_json::{Number, Value};

    /// Integer from a form string or a JSON number.
    pub fn integer(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Finite numbers only: `inf` and `NaN` texts are rejected.
    pub fn decimal(value: &Value) -> Option<f64> {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        number.filter(|number| number.is_finite())
    }

    pub fn to_integer(value: &Value) -> Option<Value> {
        integer(value).map(Value::from)
    }

    /// Numbers go back to the view model as their form text.
    pub fn to_text(value: &Value) -> Option<Value> {
        match value {
            Value::String(s) => Some(Value::String(s.clone())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        }
    }

    pub fn to_bool(value: &Value) -> Option<Value> {
        match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::String(s) if s == "true" => Some(Value::Bool(true)),
            Value::String(s) if s == "false" => Some(Value::Bool(false)),
            _ => None,
        }
    }

    /// Keeps the non-empty strings of an array.
    pub fn to_string_list(value: &Value) -> Option<Value> {
        let items = value.as_array()?;
        Some(Value::Array(
            items
                .iter()
                .filter_map(|item| item.as_str())
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        ))
    }

    /// `3` → `"3"`, `1.5` → `"1.5"`, trimming a trailing `.0`.
    pub fn decimal_text(number: f64) -> String {
        if number.fract() == 0.0 && number.abs() < 1e15 {
            format!("{}", number as i64)
        } else {
            format!("{}", number)
        }
    }

    pub fn number(n: f64) -> Option<Value> {
        Number::from_f64(n).map(Value::Number)
    }
}

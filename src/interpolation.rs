use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::expression::value::number_to_string;
use crate::store::Store;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{(.*?)\}\}").expect("placeholder pattern compiles");
}

/// Resolve `{{name}}` references in action params against the store.
///
/// Returns a fresh top-level mapping; `params` is left untouched. Strings are
/// resolved in place, sequences element-wise (strings and nested sequences
/// only), and everything else passes through, which keeps nested `actions`
/// bodies unresolved until they are dispatched themselves.
pub fn interpolate(params: &Map<String, Value>, store: &Store) -> Map<String, Value> {
    params
        .iter()
        .map(|(key, value)| (key.clone(), interpolate_value(value, store)))
        .collect()
}

pub fn interpolate_value(value: &Value, store: &Store) -> Value {
    match value {
        Value::String(template) => interpolate_string(template, store),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::String(_) | Value::Array(_) => interpolate_value(item, store),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve one string. A reference to a composite (or null) replaces the whole
/// field with that value; scalars are substituted textually.
pub fn interpolate_string(template: &str, store: &Store) -> Value {
    if !template.contains("{{") {
        return Value::String(template.to_string());
    }

    let mut result = String::with_capacity(template.len());
    let mut last = 0;

    for cap in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let name = name.as_str().trim();

        result.push_str(&template[last..whole.start()]);
        last = whole.end();

        match store.get(name) {
            Some(value @ (Value::Object(_) | Value::Array(_) | Value::Null)) => return value,
            Some(value) => result.push_str(&scalar_text(&value)),
            None => {
                tracing::warn!(variable = name, "Interpolating an unknown variable");
                result.push_str("undefined");
            }
        }
    }

    result.push_str(&template[last..]);
    Value::String(result)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => number_to_string(n.as_f64().unwrap_or(f64::NAN)),
        },
        other => other.to_string(),
    }
}

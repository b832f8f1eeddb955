use serde_json::Value;

use super::{opt_f64, opt_str, str_param, text_of};
use crate::config::INPUT_KEY;
use crate::errors::{ActionError, ConfigError};
use crate::execution::RunContext;
use crate::expression::value::number_to_json;
use crate::registry::{ActionRegistry, ActionResult, Params};
use crate::store::Store;

pub fn register(registry: &mut ActionRegistry) -> Result<(), ConfigError> {
    registry.register_builtin("setVariable", set_variable)?;
    registry.register_builtin("getVariable", get_variable)?;
    registry.register_builtin("deleteVariable", delete_variable)?;
    registry.register_builtin("transferVariable", transfer_variable)?;
    registry.register_builtin("appendToVariable", append_to_variable)?;
    registry.register_builtin("countStart", count_start)?;
    registry.register_builtin("countIncrement", count_increment)?;
    registry.register_builtin("countDecrement", count_decrement)?;
    Ok(())
}

/// Write `value` under `key`, or clear the key when there is nothing to write
fn learn(store: &Store, key: &str, value: Option<Value>) {
    match value {
        Some(value) => store.put(key, value),
        None => {
            store.remove(key);
        }
    }
}

/// `value[index]` for sequences and strings
fn element_at(value: Option<&Value>, index: f64) -> Option<Value> {
    if index < 0.0 || index.fract() != 0.0 {
        return None;
    }
    let i = index as usize;
    match value? {
        Value::Array(items) => items.get(i).cloned(),
        Value::String(s) => s.chars().nth(i).map(|c| Value::String(c.to_string())),
        Value::Object(map) => map.get(&i.to_string()).cloned(),
        _ => None,
    }
}

async fn set_variable(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("setVariable", &params, "key")?;
    cx.display(&format!(": Setting variable {}", key));
    learn(cx.store(), key, params.get("value").cloned());
    Ok(())
}

async fn get_variable(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("getVariable", &params, "key")?;
    cx.display(&format!(": Getting variable {}", key));
    let value = cx.store().get(key);
    let value = match opt_f64(&params, "index") {
        Some(index) => element_at(value.as_ref(), index),
        None => value,
    };
    learn(cx.store(), INPUT_KEY, value);
    Ok(())
}

async fn delete_variable(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("deleteVariable", &params, "key")?;
    cx.display(&format!(": Deleting variable {}", key));
    cx.store().remove(key);
    Ok(())
}

async fn transfer_variable(cx: RunContext, params: Params) -> ActionResult {
    let from = str_param("transferVariable", &params, "from")?;
    let to = str_param("transferVariable", &params, "to")?;
    cx.display(&format!(": Transferring variable {} to {}", from, to));

    let value = cx.store().get(from);
    let value = if let Some(index) = opt_f64(&params, "index") {
        element_at(value.as_ref(), index)
    } else if let Some(field) = opt_str(&params, "key") {
        // A string source holds serialized JSON
        let parsed = match value {
            Some(Value::String(raw)) => Some(serde_json::from_str::<Value>(&raw).map_err(|e| {
                ActionError::runtime("transferVariable", format!("Variable {} is not valid JSON: {}", from, e))
            })?),
            other => other,
        };
        parsed.and_then(|v| v.get(field).cloned())
    } else {
        value
    };
    learn(cx.store(), to, value);
    Ok(())
}

async fn append_to_variable(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("appendToVariable", &params, "key")?;
    cx.display(&format!(": Appending to variable {}", key));
    cx.store()
        .push(key, params.get("value").cloned().unwrap_or(Value::Null));
    Ok(())
}

async fn count_start(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("countStart", &params, "key")?;
    let value = opt_f64(&params, "value").filter(|v| *v != 0.0 && !v.is_nan()).unwrap_or(0.0);
    let value = number_to_json(value);
    cx.display(&format!(": Starting count {} with value {}", key, text_of(&value)));
    cx.store().put(key, value);
    Ok(())
}

fn step_counter(cx: &RunContext, action: &str, key: &str, delta: f64) -> Result<Value, ActionError> {
    let current = cx
        .store()
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| ActionError::runtime(action, format!("Counter {} is not a number", key)))?;
    let next = number_to_json(current + delta);
    cx.store().put(key, next.clone());
    Ok(next)
}

async fn count_increment(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("countIncrement", &params, "key")?;
    let count = step_counter(&cx, "countIncrement", key, 1.0)?;
    cx.display(&format!(": Incrementing count {} to {}", key, text_of(&count)));
    Ok(())
}

async fn count_decrement(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("countDecrement", &params, "key")?;
    let count = step_counter(&cx, "countDecrement", key, -1.0)?;
    cx.display(&format!(": Decrementing count {} to {}", key, text_of(&count)));
    Ok(())
}

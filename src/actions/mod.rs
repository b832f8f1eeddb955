//! Built-in action library.
//!
//! Each submodule registers its handlers by name. Handlers read their
//! resolved params, talk to the store, the active page or the filesystem,
//! and report progress through [`RunContext::display`].

pub mod browser;
pub mod control;
pub mod filesystem;
pub mod interaction;
pub mod utils;
pub mod variables;

use serde_json::Value;

use crate::browser::BrowserError;
use crate::errors::{ActionError, ConfigError};
use crate::expression::value::ExprValue;
use crate::models::GrabAction;
use crate::registry::{ActionRegistry, Params};

pub fn register_builtins(registry: &mut ActionRegistry) -> Result<(), ConfigError> {
    variables::register(registry)?;
    control::register(registry)?;
    filesystem::register(registry)?;
    browser::register(registry)?;
    interaction::register(registry)?;
    utils::register(registry)?;
    Ok(())
}

/// Required string param
pub(crate) fn str_param<'a>(action: &str, params: &'a Params, key: &str) -> Result<&'a str, ActionError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ActionError::runtime(action, format!("Missing string parameter '{}'", key)))
}

pub(crate) fn opt_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub(crate) fn opt_bool(params: &Params, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

pub(crate) fn opt_f64(params: &Params, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64)
}

pub(crate) fn opt_i64(params: &Params, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_i64)
}

/// A nested body such as `actions` or `elseActions`
pub(crate) fn nested_actions(action: &str, params: &Params, key: &str) -> Result<Vec<GrabAction>, ActionError> {
    let raw = params.get(key).cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(raw).map_err(|e| ActionError::Validation {
        action: action.to_string(),
        details: format!("  - {}: {}", key, e),
    })
}

/// The text a value prints as
pub(crate) fn text_of(value: &Value) -> String {
    ExprValue::from_json(value).to_js_string()
}

pub(crate) fn is_truthy(value: Option<&Value>) -> bool {
    value.map(|v| ExprValue::from_json(v).truthy()).unwrap_or(false)
}

pub(crate) fn page_error(action: &str, err: BrowserError) -> ActionError {
    ActionError::runtime(action, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_param_helpers() {
        let p = params(json!({"s": "x", "b": true, "n": 2.5, "i": 3}));
        assert_eq!(str_param("a", &p, "s").unwrap(), "x");
        assert!(str_param("a", &p, "b").is_err());
        assert_eq!(opt_bool(&p, "b"), Some(true));
        assert_eq!(opt_f64(&p, "n"), Some(2.5));
        assert_eq!(opt_i64(&p, "i"), Some(3));
        assert_eq!(opt_str(&p, "missing"), None);
    }

    #[test]
    fn test_nested_actions() {
        let p = params(json!({"actions": [{"name": "log", "params": {"message": "x"}}]}));
        let body = nested_actions("if", &p, "actions").unwrap();
        assert_eq!(body.len(), 1);
        assert!(body[0].await_);

        let bad = params(json!({"actions": [{"params": {}}]}));
        let err = nested_actions("if", &bad, "actions").unwrap_err();
        assert!(err.to_string().starts_with("[if] Validation failed:"));
    }

    #[test]
    fn test_text_of_and_truthiness() {
        assert_eq!(text_of(&json!(3)), "3");
        assert_eq!(text_of(&json!(["a", "b"])), "a,b");
        assert!(is_truthy(Some(&json!("x"))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(None));
    }
}

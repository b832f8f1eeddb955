use serde_json::Value;

use super::{nested_actions, opt_i64, str_param, text_of};
use crate::errors::{ActionError, ConfigError};
use crate::execution::RunContext;
use crate::expression::{self, Bindings};
use crate::paths::sanitize;
use crate::registry::{ActionRegistry, ActionResult, Params};

pub fn register(registry: &mut ActionRegistry) -> Result<(), ConfigError> {
    registry.register_builtin("if", if_action)?;
    registry.register_builtin("ifElse", if_else)?;
    registry.register_builtin("for", for_loop)?;
    registry.register_builtin("forEach", for_each)?;
    registry.register_builtin("while", while_loop)?;
    Ok(())
}

/// Conditions only see `INPUT`
fn condition_holds(cx: &RunContext, action: &str, condition: &str) -> Result<bool, ActionError> {
    let input = cx.store().input();
    let bindings = Bindings::new().bind("INPUT", input.as_ref());
    expression::evaluate_condition(condition, &bindings).map_err(|e| ActionError::expression(action, e))
}

async fn branch(cx: &RunContext, action: &str, params: &Params, else_key: Option<&str>) -> ActionResult {
    let condition = str_param(action, params, "condition")?;
    expression::check(condition).map_err(|e| ActionError::expression(action, e))?;
    let actions = nested_actions(action, params, "actions")?;
    let else_actions = match else_key {
        Some(key) => Some(nested_actions(action, params, key)?),
        None => None,
    };

    cx.display(&format!(": Condition: {}", condition));
    let body = if condition_holds(cx, action, condition)? {
        cx.display(": Condition is true");
        Some(actions)
    } else {
        cx.display(": Condition is false");
        else_actions
    };

    if let Some(body) = body {
        {
            let _indent = cx.store().indent_guard();
            cx.run_block(&body).await?;
        }
        cx.display(": End of if");
    }
    Ok(())
}

async fn if_action(cx: RunContext, params: Params) -> ActionResult {
    branch(&cx, "if", &params, None).await
}

async fn if_else(cx: RunContext, params: Params) -> ActionResult {
    branch(&cx, "ifElse", &params, Some("elseActions")).await
}

async fn for_loop(cx: RunContext, params: Params) -> ActionResult {
    let from = opt_i64(&params, "from").unwrap_or(0);
    let until = opt_i64(&params, "until").unwrap_or(0);
    let step = opt_i64(&params, "step").unwrap_or(1);
    let actions = nested_actions("for", &params, "actions")?;
    if step <= 0 && from <= until {
        return Err(ActionError::runtime("for", format!("step must be positive, got {}", step)));
    }

    {
        let _indent = cx.store().indent_guard();
        let mut i = from;
        while i <= until {
            cx.display(&format!(": [{}/{}]", i, until));
            cx.store().set_input(Value::from(i));
            cx.run_block(&actions).await?;
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    cx.display(": End of for loop");
    Ok(())
}

async fn for_each(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("forEach", &params, "key")?;
    let actions = nested_actions("forEach", &params, "actions")?;
    let items = match cx.store().get(key) {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(ActionError::runtime(
                "forEach",
                format!("Variable {} is not a list ({})", key, text_of(&other)),
            ))
        }
        None => return Err(ActionError::runtime("forEach", format!("Variable {} is not set", key))),
    };

    {
        let _indent = cx.store().indent_guard();
        let total = items.len();
        for (i, item) in items.into_iter().enumerate() {
            cx.display(&format!(": {}[{}/{}]: {}", key, i + 1, total, sanitize(&text_of(&item))));
            cx.store().set_input(item);
            cx.run_block(&actions).await?;
        }
    }
    cx.display(": End of forEach");
    Ok(())
}

async fn while_loop(cx: RunContext, params: Params) -> ActionResult {
    let condition = str_param("while", &params, "condition")?;
    expression::check(condition).map_err(|e| ActionError::expression("while", e))?;
    let actions = nested_actions("while", &params, "actions")?;

    {
        let _indent = cx.store().indent_guard();
        while condition_holds(&cx, "while", condition)? {
            cx.run_block(&actions).await?;
        }
    }
    cx.display(": End of while loop");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::errors::ActionError;
    use crate::execution::tests::harness;
    use serde_json::json;

    #[tokio::test]
    async fn test_if_else_picks_branch_and_restores_indent() {
        let mut h = harness();
        let cx = h.context().await;
        cx.store().set_input(json!("abc"));

        cx.invoke(
            "ifElse",
            json!({
                "condition": "INPUT.startsWith('x')",
                "actions": [{"name": "log", "params": {"message": "then"}}],
                "elseActions": [{"name": "log", "params": {"message": "else"}}]
            }),
        )
        .await
        .unwrap();

        let lines = h.lines();
        assert!(lines.contains(&": Condition is false".to_string()));
        assert!(lines.contains(&"  : else".to_string()));
        assert!(!lines.iter().any(|l| l.ends_with(": then")));
        assert_eq!(cx.store().indent(), 0);
    }

    #[tokio::test]
    async fn test_for_sets_input_each_iteration() {
        let mut h = harness();
        let cx = h.context().await;

        cx.invoke(
            "for",
            json!({
                "from": 2, "until": 6, "step": 2,
                "actions": [{"name": "appendToVariable", "params": {"key": "SEEN", "value": "{{INPUT}}"}}]
            }),
        )
        .await
        .unwrap();

        assert_eq!(cx.store().get("SEEN"), Some(json!(["2", "4", "6"])));
        let lines = h.lines();
        assert!(lines.contains(&"  : [2/6]".to_string()));
        assert!(lines.contains(&": End of for loop".to_string()));
    }

    #[tokio::test]
    async fn test_for_with_empty_range_runs_nothing() {
        let h = harness();
        let cx = h.context().await;
        cx.invoke(
            "for",
            json!({"from": 5, "until": 1, "actions": [{"name": "countIncrement", "params": {"key": "MISSING"}}]}),
        )
        .await
        .unwrap();
        assert!(cx.store().get("MISSING").is_none());
    }

    #[tokio::test]
    async fn test_for_stops_at_the_top_of_the_integer_range() {
        let mut h = harness();
        let cx = h.context().await;
        cx.invoke(
            "for",
            json!({"from": i64::MAX - 1, "until": i64::MAX, "actions": []}),
        )
        .await
        .unwrap();
        assert_eq!(cx.store().input(), Some(json!(i64::MAX)));
        let lines = h.lines();
        assert!(lines.contains(&format!("  : [{}/{}]", i64::MAX, i64::MAX)));
        assert_eq!(lines.last().unwrap(), ": End of for loop");
    }

    #[tokio::test]
    async fn test_for_each_displays_progress() {
        let mut h = harness();
        let cx = h.context().await;
        cx.store().put("URLS", json!(["a/b", "c"]));

        cx.invoke("forEach", json!({"key": "URLS", "actions": []})).await.unwrap();
        let lines = h.lines();
        assert!(lines.contains(&"  : URLS[1/2]: ab".to_string()));
        assert!(lines.contains(&"  : URLS[2/2]: c".to_string()));
        assert_eq!(cx.store().input(), Some(json!("c")));
    }

    #[tokio::test]
    async fn test_while_uses_safe_evaluator() {
        let h = harness();
        let cx = h.context().await;
        cx.store().set_input(json!(0));

        cx.invoke(
            "while",
            json!({
                "condition": "INPUT < 3",
                "actions": [
                    {"name": "countIncrement", "params": {"key": "INPUT"}}
                ]
            }),
        )
        .await
        .unwrap();
        assert_eq!(cx.store().input(), Some(json!(3)));

        let err = cx
            .invoke("while", json!({"condition": "globalThis.x = 1", "actions": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Expression { .. }));
    }

    #[tokio::test]
    async fn test_failing_body_restores_indent() {
        let h = harness();
        let cx = h.context().await;
        let err = cx
            .invoke(
                "for",
                json!({"from": 1, "until": 2, "actions": [{"name": "frobnicate"}]}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::UnknownAction(_)));
        assert_eq!(cx.store().indent(), 0);
    }
}

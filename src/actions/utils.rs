use rand::Rng;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::{opt_f64, opt_i64, opt_str, str_param};
use crate::errors::{ActionError, ConfigError};
use crate::execution::RunContext;
use crate::expression::value::{number_to_json, number_to_string};
use crate::paths;
use crate::registry::{ActionRegistry, ActionResult, Params};

pub fn register(registry: &mut ActionRegistry) -> Result<(), ConfigError> {
    registry.register_builtin("sleep", sleep)?;
    registry.register_builtin("log", log)?;
    registry.register_builtin("sanitizeString", sanitize_string)?;
    registry.register_builtin("replaceString", replace_string)?;
    registry.register_builtin("matchFromString", match_from_string)?;
    registry.register_builtin("matchFromSelector", match_from_selector)?;
    registry.register_builtin("random", random)?;
    registry.register_builtin("uuid", generate_uuid)?;
    registry.register_builtin("getExtension", get_extension)?;
    registry.register_builtin("userInput", user_input)?;
    Ok(())
}

fn compile(action: &str, pattern: &str) -> Result<Regex, ActionError> {
    Regex::new(pattern)
        .map_err(|e| ActionError::runtime(action, format!("Invalid regular expression {}: {}", pattern, e)))
}

async fn sleep(cx: RunContext, params: Params) -> ActionResult {
    let ms = opt_i64(&params, "ms").unwrap_or(0).max(0) as u64;
    cx.display(&format!(": Sleeping {} ms", ms));
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(())
}

async fn log(cx: RunContext, params: Params) -> ActionResult {
    let message = str_param("log", &params, "message")?;
    cx.display(&format!(": {}", message));
    Ok(())
}

async fn sanitize_string(cx: RunContext, params: Params) -> ActionResult {
    let text = str_param("sanitizeString", &params, "string")?;
    cx.store().set_input(Value::String(paths::sanitize(text)));
    Ok(())
}

async fn replace_string(cx: RunContext, params: Params) -> ActionResult {
    let text = str_param("replaceString", &params, "string")?;
    let search = str_param("replaceString", &params, "search")?;
    let replace = str_param("replaceString", &params, "replace")?;
    // First occurrence only
    cx.store().set_input(Value::String(text.replacen(search, replace, 1)));
    Ok(())
}

async fn match_from_string(cx: RunContext, params: Params) -> ActionResult {
    let text = str_param("matchFromString", &params, "string")?;
    let pattern = compile("matchFromString", str_param("matchFromString", &params, "regex")?)?;
    let found = pattern.find(text).map(|m| m.as_str()).unwrap_or("");
    cx.store().set_input(Value::String(found.to_string()));
    Ok(())
}

async fn match_from_selector(cx: RunContext, params: Params) -> ActionResult {
    let selector = str_param("matchFromSelector", &params, "selector")?;
    let pattern = compile("matchFromSelector", str_param("matchFromSelector", &params, "regex")?)?;
    let page = cx.page("matchFromSelector")?;

    let html = match page.first_content(selector, opt_str(&params, "attribute")).await {
        Ok(Some(html)) => html,
        Ok(None) | Err(_) => {
            cx.display(": No element found");
            String::new()
        }
    };
    let matches: Vec<Value> = pattern
        .find_iter(&html)
        .map(|m| Value::String(m.as_str().to_string()))
        .collect();
    cx.store().set_input(Value::Array(matches));
    Ok(())
}

async fn random(cx: RunContext, params: Params) -> ActionResult {
    let min = opt_f64(&params, "min").unwrap_or(0.0);
    let max = opt_f64(&params, "max").unwrap_or(0.0);
    cx.display(&format!(
        ": Generating random number between {} and {}",
        number_to_string(min),
        number_to_string(max)
    ));
    let roll: f64 = rand::thread_rng().gen();
    let value = (roll * (max - min + 1.0)).floor() + min;
    cx.store().set_input(number_to_json(value));
    Ok(())
}

async fn generate_uuid(cx: RunContext, _params: Params) -> ActionResult {
    let id = uuid::Uuid::new_v4().to_string();
    cx.store().set_input(Value::String(id.clone()));
    cx.display(&format!(": Generating uuid {}", id));
    Ok(())
}

async fn get_extension(cx: RunContext, params: Params) -> ActionResult {
    let text = str_param("getExtension", &params, "string")?;
    cx.store().set_input(Value::String(paths::extension(text)));
    Ok(())
}

async fn user_input(cx: RunContext, params: Params) -> ActionResult {
    let query = str_param("userInput", &params, "query")?;
    let prompt = format!("{}{}", " ".repeat(cx.store().indent()), query);

    let failed = |e: std::io::Error| ActionError::runtime("userInput", e.to_string());
    let mut stdout = tokio::io::stdout();
    stdout.write_all(prompt.as_bytes()).await.map_err(failed)?;
    stdout.flush().await.map_err(failed)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let answer = lines
        .next_line()
        .await
        .map_err(failed)?
        .unwrap_or_default();
    cx.store().set_input(Value::String(answer));
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::browser::fake::{FakeElement, FakePage};
    use crate::execution::tests::{harness, harness_with};
    use crate::registry::ActionRegistry;
    use serde_json::json;

    #[tokio::test]
    async fn test_string_utilities() {
        let h = harness();
        let cx = h.context().await;

        cx.invoke("sanitizeString", json!({"string": "  Tom/Jerry [1]  "})).await.unwrap();
        assert_eq!(cx.store().input(), Some(json!("TomJerry 1")));

        cx.invoke("replaceString", json!({"string": "a-b-c", "search": "-", "replace": "+"}))
            .await
            .unwrap();
        assert_eq!(cx.store().input(), Some(json!("a+b-c")));

        cx.invoke("matchFromString", json!({"string": "order #1234 shipped", "regex": "\\d+"}))
            .await
            .unwrap();
        assert_eq!(cx.store().input(), Some(json!("1234")));

        cx.invoke("matchFromString", json!({"string": "none", "regex": "\\d+"})).await.unwrap();
        assert_eq!(cx.store().input(), Some(json!("")));

        cx.invoke("getExtension", json!({"string": "https://x.test/report.pdf"})).await.unwrap();
        assert_eq!(cx.store().input(), Some(json!(".pdf")));

        let err = cx
            .invoke("matchFromString", json!({"string": "x", "regex": "("}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid regular expression"));
    }

    #[tokio::test]
    async fn test_match_from_selector() {
        let page = FakePage::new().with_element(
            "#prices",
            FakeElement::new("").html("<b>12</b> and <b>30</b>").attr("data-range", "5-9"),
        );
        let mut h = harness_with(page, ActionRegistry::with_builtins().unwrap());
        let cx = h.context().await;

        cx.invoke("matchFromSelector", json!({"selector": "#prices", "regex": "\\d+"})).await.unwrap();
        assert_eq!(cx.store().input(), Some(json!(["12", "30"])));

        cx.invoke(
            "matchFromSelector",
            json!({"selector": "#prices", "regex": "\\d", "attribute": "data-range"}),
        )
        .await
        .unwrap();
        assert_eq!(cx.store().input(), Some(json!(["5", "9"])));

        cx.invoke("matchFromSelector", json!({"selector": "#nope", "regex": "x"})).await.unwrap();
        assert_eq!(cx.store().input(), Some(json!([])));
        assert!(h.lines().contains(&": No element found".to_string()));
    }

    #[tokio::test]
    async fn test_random_stays_in_range() {
        let h = harness();
        let cx = h.context().await;
        for _ in 0..50 {
            cx.invoke("random", json!({"min": 3, "max": 5})).await.unwrap();
            let n = cx.store().input().unwrap().as_i64().unwrap();
            assert!((3..=5).contains(&n));
        }
    }

    #[tokio::test]
    async fn test_uuid_and_log() {
        let mut h = harness();
        let cx = h.context().await;
        cx.invoke("uuid", json!({})).await.unwrap();
        let id = cx.store().input().unwrap();
        assert!(uuid::Uuid::parse_str(id.as_str().unwrap()).is_ok());

        cx.invoke("log", json!({"message": "done", "color": "green"})).await.unwrap();
        let lines = h.lines();
        assert!(lines.contains(&format!(": Generating uuid {}", id.as_str().unwrap())));
        assert!(lines.contains(&": done".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_waits() {
        let h = harness();
        let cx = h.context().await;
        let started = tokio::time::Instant::now();
        cx.invoke("sleep", json!({"ms": 1500})).await.unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_millis(1500));
    }
}

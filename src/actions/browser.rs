use serde_json::{json, Value};

use super::{opt_bool, opt_str, page_error, str_param};
use crate::browser::{self as driver, ImageFormat, ScreenshotRequest};
use crate::errors::{ActionError, ConfigError};
use crate::execution::RunContext;
use crate::paths;
use crate::registry::{ActionRegistry, ActionResult, Params};

pub fn register(registry: &mut ActionRegistry) -> Result<(), ConfigError> {
    registry.register_builtin("puppeteer", puppeteer)?;
    registry.register_builtin("newPage", new_page)?;
    registry.register_builtin("closePage", close_page)?;
    registry.register_builtin("switchPage", switch_page)?;
    registry.register_builtin("screenshot", screenshot)?;
    registry.register_builtin("screenshotElement", screenshot_element)?;
    registry.register_builtin("getElements", get_elements)?;
    registry.register_builtin("getChildren", get_children)?;
    registry.register_builtin("elementExists", element_exists)?;
    Ok(())
}

/// Generic page call. Every param other than `func`/`func2` is a positional
/// argument, in declaration order. Failures are reported and swallowed.
async fn puppeteer(cx: RunContext, params: Params) -> ActionResult {
    let func = str_param("puppeteer", &params, "func")?;
    let func2 = opt_str(&params, "func2");
    cx.display(&format!(
        ": Puppeteer {}{}",
        func,
        func2.map(|f| format!(".{}", f)).unwrap_or_default()
    ));

    if func == "newPage" {
        let key = uuid::Uuid::new_v4().to_string();
        return cx.invoke("newPage", json!({ "pageKey": key })).await;
    }

    let args: Vec<Value> = params
        .iter()
        .filter(|(name, _)| *name != "func" && *name != "func2")
        .map(|(_, value)| value.clone())
        .collect();
    let page = cx.page("puppeteer")?;
    match driver::invoke(page.as_ref(), func, func2, &args).await {
        Ok(result) => cx.store().set_input(result),
        Err(err) => {
            tracing::warn!(func, error = %err, "Page call failed");
            cx.display(&format!(": Puppeteer call failed: {}", err));
        }
    }
    Ok(())
}

async fn new_page(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("newPage", &params, "pageKey")?;
    let page = cx
        .engine()
        .browser()
        .new_page()
        .await
        .map_err(|e| page_error("newPage", e))?;
    cx.store().insert_page(key, page);
    cx.display(&format!("New page created with key '{}'", key));
    Ok(())
}

async fn close_page(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("closePage", &params, "pageKey")?;
    match cx.store().remove_page(key) {
        Some(page) => {
            page.close().await.map_err(|e| page_error("closePage", e))?;
            cx.display(&format!("Page with key '{}' closed", key));
        }
        None => cx.display(&format!("Page with key '{}' not found", key)),
    }
    Ok(())
}

async fn switch_page(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("switchPage", &params, "pageKey")?;
    match cx.store().page(key) {
        Some(page) => {
            page.bring_to_front().await.map_err(|e| page_error("switchPage", e))?;
            cx.store().activate_page(key);
            cx.display(&format!("Switched to page with key '{}'", key));
        }
        None => cx.display(&format!("Page with key '{}' not found", key)),
    }
    Ok(())
}

fn screenshot_path(cx: &RunContext, action: &str, name: &str, format: ImageFormat) -> Result<std::path::PathBuf, ActionError> {
    let dir = cx
        .store()
        .current_dir()
        .ok_or_else(|| ActionError::runtime(action, "No base directory set"))?;
    Ok(dir.join(format!("{}.{}", paths::sanitize(name), format.extension())))
}

async fn screenshot(cx: RunContext, params: Params) -> ActionResult {
    let name = str_param("screenshot", &params, "name")?;
    let format = ImageFormat::parse(opt_str(&params, "type"));
    let path = screenshot_path(&cx, "screenshot", name, format)?;
    cx.display(&format!(": Taking screenshot {}", name));

    let page = cx.page("screenshot")?;
    page.screenshot(&ScreenshotRequest {
        path,
        format,
        full_page: opt_bool(&params, "fullPage").unwrap_or(true),
        clip: None,
    })
    .await
    .map_err(|e| page_error("screenshot", e))
}

async fn screenshot_element(cx: RunContext, params: Params) -> ActionResult {
    let name = str_param("screenshotElement", &params, "name")?;
    let selector = str_param("screenshotElement", &params, "selector")?;
    let format = ImageFormat::parse(opt_str(&params, "type"));
    let path = screenshot_path(&cx, "screenshotElement", name, format)?;
    cx.display(&format!(": Taking screenshot of element {}", name));

    let page = cx.page("screenshotElement")?;
    let model = page
        .box_model(selector)
        .await
        .map_err(|e| ActionError::selector("screenshotElement", selector, Some(e.to_string())))?;
    page.screenshot(&ScreenshotRequest {
        path,
        format,
        full_page: false,
        clip: Some(model.padded_clip()),
    })
    .await
    .map_err(|e| page_error("screenshotElement", e))
}

async fn get_elements(cx: RunContext, params: Params) -> ActionResult {
    let selector = str_param("getElements", &params, "selector")?;
    let page = cx.page("getElements")?;
    let values = page
        .texts(selector, opt_str(&params, "attribute"))
        .await
        .map_err(|e| page_error("getElements", e))?;
    cx.store().set_input(Value::Array(values));
    Ok(())
}

async fn get_children(cx: RunContext, params: Params) -> ActionResult {
    let parent = str_param("getChildren", &params, "selectorParent")?;
    let child = str_param("getChildren", &params, "selectorChild")?;
    let page = cx.page("getChildren")?;
    let groups = page
        .child_texts(parent, child, opt_str(&params, "attribute"))
        .await
        .map_err(|e| page_error("getChildren", e))?;
    cx.store()
        .set_input(Value::Array(groups.into_iter().map(Value::Array).collect()));
    Ok(())
}

async fn element_exists(cx: RunContext, params: Params) -> ActionResult {
    let selector = str_param("elementExists", &params, "selector")?;
    let page = cx.page("elementExists")?;
    let count = page.count(selector).await.map_err(|e| page_error("elementExists", e))?;
    cx.store().set_input(Value::Bool(count > 0));
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::browser::fake::{FakeElement, FakePage};
    use crate::browser::{BoxModel, Point};
    use crate::config::PAGES_KEY;
    use crate::execution::tests::{harness, harness_with};
    use crate::registry::ActionRegistry;
    use serde_json::json;

    fn registry() -> ActionRegistry {
        ActionRegistry::with_builtins().unwrap()
    }

    #[tokio::test]
    async fn test_puppeteer_passes_positional_args() {
        let h = harness_with(FakePage::new().with_title("Shop"), registry());
        let cx = h.context().await;

        cx.invoke("puppeteer", json!({"func": "goto", "url": "https://shop.test", "options": {"timeout": 1000}}))
            .await
            .unwrap();
        assert_eq!(h.page.events(), vec!["goto https://shop.test".to_string()]);

        cx.invoke("puppeteer", json!({"func": "title"})).await.unwrap();
        assert_eq!(cx.store().input(), Some(json!("Shop")));
    }

    #[tokio::test]
    async fn test_puppeteer_failures_do_not_abort() {
        let mut h = harness();
        let cx = h.context().await;
        cx.store().set_input(json!("before"));

        cx.invoke("puppeteer", json!({"func": "pdf"})).await.unwrap();
        assert_eq!(cx.store().input(), Some(json!("before")));
        assert!(h
            .lines()
            .contains(&": Puppeteer call failed: Unsupported page method: pdf".to_string()));
    }

    #[tokio::test]
    async fn test_page_lifecycle() {
        let mut h = harness();
        let cx = h.context().await;

        cx.invoke("newPage", json!({"pageKey": "second"})).await.unwrap();
        assert_eq!(cx.store().get(PAGES_KEY), Some(json!(["default", "second"])));

        cx.invoke("switchPage", json!({"pageKey": "second"})).await.unwrap();
        assert_eq!(cx.store().get("ACTIVE_PAGE"), Some(json!("second")));

        cx.invoke("closePage", json!({"pageKey": "second"})).await.unwrap();
        cx.invoke("closePage", json!({"pageKey": "second"})).await.unwrap();
        assert!(h.browser.created()[1].is_closed());

        let lines = h.lines();
        assert!(lines.contains(&"New page created with key 'second'".to_string()));
        assert!(lines.contains(&"Switched to page with key 'second'".to_string()));
        assert!(lines.contains(&"Page with key 'second' closed".to_string()));
        assert!(lines.contains(&"Page with key 'second' not found".to_string()));
    }

    #[tokio::test]
    async fn test_puppeteer_new_page_uses_fresh_key() {
        let h = harness();
        let cx = h.context().await;
        cx.invoke("puppeteer", json!({"func": "newPage"})).await.unwrap();
        let pages = cx.store().get(PAGES_KEY).unwrap();
        assert_eq!(pages.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_element_reads() {
        let page = FakePage::new()
            .with_element("li", FakeElement::new("one").attr("data-id", "1"))
            .with_element("li", FakeElement::new("two").attr("data-id", "2"))
            .with_element(
                "ul",
                FakeElement::new("")
                    .child("a", FakeElement::new("x"))
                    .child("a", FakeElement::new("y")),
            );
        let h = harness_with(page, registry());
        let cx = h.context().await;

        cx.invoke("getElements", json!({"selector": "li"})).await.unwrap();
        assert_eq!(cx.store().input(), Some(json!(["one", "two"])));

        cx.invoke("getElements", json!({"selector": "li", "attribute": "data-id"})).await.unwrap();
        assert_eq!(cx.store().input(), Some(json!(["1", "2"])));

        cx.invoke("getChildren", json!({"selectorParent": "ul", "selectorChild": "a"})).await.unwrap();
        assert_eq!(cx.store().input(), Some(json!([["x", "y"]])));

        cx.invoke("elementExists", json!({"selector": "table"})).await.unwrap();
        assert_eq!(cx.store().input(), Some(json!(false)));
    }

    #[tokio::test]
    async fn test_screenshots_land_in_current_dir() {
        let point = |x, y| Point { x, y };
        let model = BoxModel {
            border: [point(10.0, 20.0), point(110.0, 20.0), point(110.0, 70.0), point(10.0, 70.0)],
            margin: [point(10.0, 20.0), point(110.0, 20.0), point(110.0, 70.0), point(10.0, 70.0)],
            width: 100.0,
            height: 50.0,
        };
        let page = FakePage::new().with_element("#card", FakeElement::new("card").with_box(model));
        let h = harness_with(page, registry());
        let cx = h.context().await;

        cx.invoke("screenshot", json!({"name": "home page", "type": "jpeg"})).await.unwrap();
        assert!(h.base().join("home page.jpeg").exists());

        cx.invoke("screenshotElement", json!({"name": "card", "selector": "#card"})).await.unwrap();
        assert!(h.base().join("card.png").exists());

        let err = cx
            .invoke("screenshotElement", json!({"name": "x", "selector": "#nope"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SelectorError");
    }
}

use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use super::{opt_bool, opt_i64, opt_str, str_param};
use crate::browser::{Cookie, Page};
use crate::errors::{ActionError, ConfigError};
use crate::execution::RunContext;
use crate::registry::{ActionRegistry, ActionResult, Params};
use crate::retry::{is_retryable, retry_line, retry_with_backoff, RetryOptions};

const VISIBLE_TIMEOUT: Duration = Duration::from_secs(5);
const USERNAME_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const COOKIES_FILE: &str = "cookies/cookies.json";

pub fn register(registry: &mut ActionRegistry) -> Result<(), ConfigError> {
    registry.register_builtin("click", click)?;
    registry.register_builtin("clickAll", click_all)?;
    registry.register_builtin("scrollWaitClick", scroll_wait_click)?;
    registry.register_builtin("type", type_text)?;
    registry.register_builtin("login", login)?;
    Ok(())
}

/// Retry `attempt` on transient failures, showing each retry in the run output
async fn with_retry<F, Fut>(cx: &RunContext, options: RetryOptions, attempt: F) -> ActionResult
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ActionResult>,
{
    retry_with_backoff(
        &options,
        attempt,
        |err: &ActionError| is_retryable(&err.to_string()),
        |n, delay| cx.display(&retry_line(n, options.max_attempts, delay)),
    )
    .await
}

async fn click_once(
    page: &dyn Page,
    selector: &str,
    attribute: Option<&str>,
    text: Option<&str>,
) -> ActionResult {
    let failed = |e: crate::browser::BrowserError| ActionError::selector("click", selector, Some(e.to_string()));

    if attribute.is_none() && text.is_none() {
        page.wait_for_selector(selector, true, VISIBLE_TIMEOUT).await.map_err(failed)?;
        return page.click(selector, 0).await.map_err(failed);
    }

    if page.count(selector).await.map_err(failed)? == 0 {
        return Err(ActionError::selector("click", selector, None));
    }
    // Match on the attribute value when both are given, on the text content otherwise
    if let Some(wanted) = text {
        let values = page.texts(selector, attribute).await.map_err(failed)?;
        if let Some(index) = values.iter().position(|v| v.as_str() == Some(wanted)) {
            return page.click(selector, index).await.map_err(failed);
        }
    }
    Err(ActionError::selector(
        "click",
        selector,
        Some("No matching element found".to_string()),
    ))
}

async fn click(cx: RunContext, params: Params) -> ActionResult {
    let selector = str_param("click", &params, "selector")?;
    let attribute = opt_str(&params, "attribute");
    let text = opt_str(&params, "text");
    let page = cx.page("click")?;
    let page: &dyn Page = page.as_ref();

    with_retry(&cx, RetryOptions::default(), move || {
        click_once(page, selector, attribute, text)
    })
    .await
}

async fn click_all(cx: RunContext, params: Params) -> ActionResult {
    let selector = str_param("clickAll", &params, "selector")?;
    let page = cx.page("clickAll")?;
    let failed = |e: crate::browser::BrowserError| ActionError::selector("clickAll", selector, Some(e.to_string()));

    let count = page.count(selector).await.map_err(failed)?;
    for index in 0..count {
        page.scroll_into_view(selector, index).await.map_err(failed)?;
        page.click(selector, index).await.map_err(failed)?;
    }
    Ok(())
}

async fn scroll_wait_click(cx: RunContext, params: Params) -> ActionResult {
    let selector = str_param("scrollWaitClick", &params, "selector")?;
    let wait = Duration::from_millis(opt_i64(&params, "ms").unwrap_or(2000).max(0) as u64);
    let page = cx.page("scrollWaitClick")?;
    let failed = |e: crate::browser::BrowserError| {
        ActionError::selector("scrollWaitClick", selector, Some(e.to_string()))
    };

    page.scroll_into_view(selector, 0).await.map_err(failed)?;
    tokio::time::sleep(wait).await;
    page.click(selector, 0).await.map_err(failed)
}

async fn type_once(cx: &RunContext, page: &dyn Page, selector: &str, text: &str, secret: bool) -> ActionResult {
    cx.display(&format!(": Typing {}", if secret { "•••••" } else { text }));
    let failed = |e: crate::browser::BrowserError| ActionError::selector("type", selector, Some(e.to_string()));
    page.wait_for_selector(selector, true, VISIBLE_TIMEOUT).await.map_err(failed)?;
    page.type_text(selector, text).await.map_err(failed)
}

async fn type_text(cx: RunContext, params: Params) -> ActionResult {
    let selector = str_param("type", &params, "selector")?;
    let text = str_param("type", &params, "text")?;
    let secret = opt_bool(&params, "secret").unwrap_or(false);
    let page = cx.page("type")?;
    let page: &dyn Page = page.as_ref();
    let context = &cx;

    with_retry(&cx, RetryOptions::default(), move || {
        type_once(context, page, selector, text, secret)
    })
    .await
}

struct Login<'a> {
    url: &'a str,
    username_selector: &'a str,
    username: &'a str,
    password_selector: &'a str,
    password: &'a str,
    submit_selector: &'a str,
    cookie_name: Option<&'a str>,
}

impl<'a> Login<'a> {
    fn from_params(params: &'a Params) -> Result<Self, ActionError> {
        Ok(Self {
            url: str_param("login", params, "url")?,
            username_selector: str_param("login", params, "usernameSelector")?,
            username: str_param("login", params, "username")?,
            password_selector: str_param("login", params, "passwordSelector")?,
            password: str_param("login", params, "password")?,
            submit_selector: str_param("login", params, "submitSelector")?,
            cookie_name: opt_str(params, "cookieName"),
        })
    }
}

/// True when the cached session cookie is still valid and was installed
async fn restore_cookies(cx: &RunContext, page: &dyn Page, cache: &Path, cookie_name: Option<&str>) -> Result<bool, ActionError> {
    if !fs::try_exists(cache).await.unwrap_or(false) {
        return Ok(false);
    }
    cx.display(": Loading cookies");
    let raw = fs::read_to_string(cache)
        .await
        .map_err(|e| ActionError::fs("login", "read", cache, e))?;
    let cookies: Vec<Cookie> = serde_json::from_str(&raw).unwrap_or_default();

    let token = match cookie_name {
        Some(name) => cookies.iter().find(|c| c.name == name),
        None => cookies.first(),
    };
    let now_ms = chrono::Utc::now().timestamp_millis() as f64;
    if token.is_some_and(|t| t.expires * 1000.0 > now_ms) {
        page.set_cookies(cookies)
            .await
            .map_err(|e| ActionError::runtime("login", e.to_string()))?;
        cx.display(": Cookies loaded");
        return Ok(true);
    }

    fs::remove_file(cache)
        .await
        .map_err(|e| ActionError::fs("login", "unlink", cache, e))?;
    cx.display(": Cookies expired");
    Ok(false)
}

async fn submit_credentials(cx: &RunContext, page: &dyn Page, login: &Login<'_>, cache: &Path) -> ActionResult {
    let waited = |selector: &str, e: crate::browser::BrowserError| {
        ActionError::selector("login", selector, Some(e.to_string()))
    };

    cx.invoke("puppeteer", json!({ "func": "goto", "url": login.url })).await?;
    cx.display(": Page loaded");

    page.wait_for_selector(login.username_selector, true, USERNAME_TIMEOUT)
        .await
        .map_err(|e| waited(login.username_selector, e))?;
    cx.invoke("type", json!({ "selector": login.username_selector, "text": login.username }))
        .await?;

    page.wait_for_selector(login.password_selector, true, VISIBLE_TIMEOUT)
        .await
        .map_err(|e| waited(login.password_selector, e))?;
    cx.invoke(
        "type",
        json!({ "selector": login.password_selector, "text": login.password, "secret": true }),
    )
    .await?;
    cx.display(": Credentials entered");

    page.wait_for_selector(login.submit_selector, true, VISIBLE_TIMEOUT)
        .await
        .map_err(|e| waited(login.submit_selector, e))?;
    cx.invoke("click", json!({ "selector": login.submit_selector })).await?;
    cx.display(": Login submitted");

    page.wait_for_navigation(LOGIN_NAVIGATION_TIMEOUT)
        .await
        .map_err(|e| ActionError::runtime("login", e.to_string()))?;

    let cookies = page
        .cookies()
        .await
        .map_err(|e| ActionError::runtime("login", e.to_string()))?;
    if !cookies.is_empty() {
        if let Some(dir) = cache.parent() {
            if !fs::try_exists(dir).await.unwrap_or(false) {
                cx.invoke("createDir", json!({ "dir": "cookies", "useBaseDir": true })).await?;
            }
        }
        let body = serde_json::to_string(&cookies).map_err(|e| ActionError::runtime("login", e.to_string()))?;
        fs::write(cache, body)
            .await
            .map_err(|e| ActionError::fs("login", "write", cache, e))?;
        cx.display(": Cookies saved");
    }
    Ok(())
}

async fn login_once(cx: &RunContext, page: &dyn Page, login: &Login<'_>) -> ActionResult {
    let _indent = cx.store().indent_guard();
    let base = cx
        .store()
        .base_dir()
        .ok_or_else(|| ActionError::runtime("login", "No base directory set"))?;
    let cache = base.join(COOKIES_FILE);

    if restore_cookies(cx, page, &cache, login.cookie_name).await? {
        return Ok(());
    }
    submit_credentials(cx, page, login, &cache)
        .await
        .map_err(|e| ActionError::network("login", login.url, e))
}

async fn login(cx: RunContext, params: Params) -> ActionResult {
    let login = Login::from_params(&params)?;
    let page = cx.page("login")?;
    let page: &dyn Page = page.as_ref();
    let (context, login) = (&cx, &login);

    with_retry(
        &cx,
        RetryOptions::default().with_initial_delay(Duration::from_millis(2000)),
        move || login_once(context, page, login),
    )
    .await
}

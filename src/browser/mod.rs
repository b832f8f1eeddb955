//! Browser driver interface.
//!
//! Actions never talk to Chrome directly; they go through [`Page`] handles
//! created by a [`BrowserDriver`]. The production driver is
//! [`chromium::ChromiumBrowser`]; tests use the scripted pages in `fake`.

pub mod chromium;
#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type PageHandle = Arc<dyn Page>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),
    /// The message always carries the word `timeout` so the retry predicate matches it
    #[error("{0}")]
    Timeout(String),
    #[error("No element matches selector {0}")]
    NoElement(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Unsupported page method: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BrowserError {
    pub fn selector_timeout(selector: &str, timeout: Duration) -> Self {
        BrowserError::Timeout(format!(
            "Waiting for selector `{}` failed: timeout {}ms exceeded",
            selector,
            timeout.as_millis()
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Unknown names fall back to png
    pub fn parse(name: Option<&str>) -> Self {
        match name {
            Some("jpeg") => ImageFormat::Jpeg,
            _ => ImageFormat::Png,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone)]
pub struct ScreenshotRequest {
    pub path: PathBuf,
    pub format: ImageFormat,
    pub full_page: bool,
    pub clip: Option<Clip>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Element geometry. Each quad lists its corners clockwise from the top-left.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoxModel {
    pub border: [Point; 4],
    pub margin: [Point; 4],
    pub width: f64,
    pub height: f64,
}

impl BoxModel {
    /// Clip rectangle anchored at the border box, adjusted by the
    /// margin-to-border distance on each side.
    pub fn padded_clip(&self) -> Clip {
        let padding_left = self.border[3].x - self.margin[3].x;
        let padding_right = self.margin[1].x - self.border[1].x;
        let padding_top = self.border[0].y - self.margin[0].y;
        let padding_bottom = self.margin[2].y - self.border[2].y;

        Clip {
            x: self.border[0].x,
            y: self.border[0].y,
            width: self.width - padding_left - padding_right,
            height: self.height + padding_top + padding_bottom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    /// Seconds since the epoch; negative for session cookies
    #[serde(default)]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

/// One browser tab.
///
/// Element-level operations address elements by selector and, where several
/// can match, by their index in document order.
#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;
    async fn reload(&self) -> Result<(), BrowserError>;
    async fn url(&self) -> Result<String, BrowserError>;
    async fn title(&self) -> Result<String, BrowserError>;
    async fn content(&self) -> Result<String, BrowserError>;
    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError>;

    async fn go_back(&self) -> Result<(), BrowserError> {
        self.evaluate("history.back()").await.map(|_| ())
    }

    async fn go_forward(&self) -> Result<(), BrowserError> {
        self.evaluate("history.forward()").await.map(|_| ())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        visible: bool,
        timeout: Duration,
    ) -> Result<(), BrowserError>;
    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), BrowserError>;

    /// Number of elements matching `selector`
    async fn count(&self, selector: &str) -> Result<usize, BrowserError>;
    async fn click(&self, selector: &str, index: usize) -> Result<(), BrowserError>;
    async fn scroll_into_view(&self, selector: &str, index: usize) -> Result<(), BrowserError>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    /// `textContent` (or the named attribute) of every match; null where absent
    async fn texts(&self, selector: &str, attribute: Option<&str>) -> Result<Vec<Value>, BrowserError>;
    /// [`Page::texts`] of `child` within each match of `parent`
    async fn child_texts(
        &self,
        parent: &str,
        child: &str,
        attribute: Option<&str>,
    ) -> Result<Vec<Vec<Value>>, BrowserError>;
    /// `innerHTML` (or the named attribute) of the first match
    async fn first_content(&self, selector: &str, attribute: Option<&str>) -> Result<Option<String>, BrowserError>;
    async fn box_model(&self, selector: &str) -> Result<BoxModel, BrowserError>;

    async fn screenshot(&self, request: &ScreenshotRequest) -> Result<(), BrowserError>;
    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError>;
    async fn set_cookies(&self, cookies: Vec<Cookie>) -> Result<(), BrowserError>;
    async fn bring_to_front(&self) -> Result<(), BrowserError>;
    async fn close(&self) -> Result<(), BrowserError>;
}

/// Process-wide browser; hands out fresh pages.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_page(&self) -> Result<PageHandle, BrowserError>;
    async fn close(&self) -> Result<(), BrowserError>;
}

pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Call a page method by name, the way the `puppeteer` action does.
///
/// `args` are positional. A `func2` names a method on the object returned by
/// `func`; no supported method exposes one.
pub async fn invoke(
    page: &dyn Page,
    func: &str,
    func2: Option<&str>,
    args: &[Value],
) -> Result<Value, BrowserError> {
    if let Some(sub) = func2 {
        return Err(BrowserError::Unsupported(format!("{}.{}", func, sub)));
    }

    match func {
        "goto" => {
            let timeout = option_ms(args, 1, "timeout")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_NAVIGATION_TIMEOUT);
            page.goto(string_arg(func, args, 0)?, timeout).await?;
            Ok(Value::Null)
        }
        "reload" => page.reload().await.map(|_| Value::Null),
        "goBack" => page.go_back().await.map(|_| Value::Null),
        "goForward" => page.go_forward().await.map(|_| Value::Null),
        "title" => page.title().await.map(Value::String),
        "url" => page.url().await.map(Value::String),
        "content" => page.content().await.map(Value::String),
        "evaluate" => page.evaluate(string_arg(func, args, 0)?).await,
        "bringToFront" => page.bring_to_front().await.map(|_| Value::Null),
        "waitForSelector" => {
            let visible = args
                .get(1)
                .and_then(|options| options.get("visible"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let timeout = Duration::from_millis(option_ms(args, 1, "timeout").unwrap_or(30_000));
            page.wait_for_selector(string_arg(func, args, 0)?, visible, timeout).await?;
            Ok(Value::Null)
        }
        "waitForTimeout" => {
            let ms = args.first().and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(Value::Null)
        }
        "waitForNavigation" => {
            let timeout = option_ms(args, 0, "timeout")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_NAVIGATION_TIMEOUT);
            page.wait_for_navigation(timeout).await?;
            Ok(Value::Null)
        }
        other => Err(BrowserError::Unsupported(other.to_string())),
    }
}

fn string_arg<'a>(func: &str, args: &'a [Value], index: usize) -> Result<&'a str, BrowserError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| BrowserError::Protocol(format!("{} expects a string argument", func)))
}

fn option_ms(args: &[Value], index: usize, key: &str) -> Option<u64> {
    args.get(index)
        .and_then(|options| options.get(key))
        .and_then(Value::as_u64)
}

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{
    BoxModel, BrowserDriver, BrowserError, Cookie, ImageFormat, Page, PageHandle,
    ScreenshotRequest,
};
use crate::config::Settings;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

impl From<CdpError> for BrowserError {
    fn from(err: CdpError) -> Self {
        match err {
            CdpError::Timeout => BrowserError::Timeout("Request timeout".to_string()),
            other => BrowserError::Protocol(other.to_string()),
        }
    }
}

/// JavaScript string literal for `text`
fn js_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

fn js_optional(text: Option<&str>) -> String {
    text.map(js_string).unwrap_or_else(|| "null".to_string())
}

// Element read used by the text queries: attribute when given, else textContent
const READ_ELEMENT: &str = "(el, attr) => attr ? el.getAttribute(attr) : el.textContent";

const VISIBLE_ELEMENT: &str = "el => { \
    const style = window.getComputedStyle(el); \
    return style.visibility !== 'hidden' && \
        !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length); }";

pub struct ChromiumBrowser {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

impl ChromiumBrowser {
    pub async fn launch(settings: &Settings) -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder();
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &settings.chrome_executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // The connection only makes progress while its handler is polled
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "Browser handler stopped");
                    break;
                }
            }
        });

        tracing::info!(headless = settings.headless, "Browser launched");
        Ok(Self {
            browser: Mutex::new(browser),
            handler,
        })
    }
}

#[async_trait]
impl BrowserDriver for ChromiumBrowser {
    async fn new_page(&self) -> Result<PageHandle, BrowserError> {
        let page = self.browser.lock().await.new_page("about:blank").await?;
        Ok(Arc::new(ChromiumPage { page }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let mut browser = self.browser.lock().await;
        browser.close().await?;
        if let Err(e) = browser.wait().await {
            tracing::warn!(error = %e, "Browser process did not exit cleanly");
        }
        self.handler.abort();
        Ok(())
    }
}

pub struct ChromiumPage {
    page: chromiumoxide::Page,
}

impl ChromiumPage {
    async fn eval_as<T: DeserializeOwned>(&self, script: &str) -> Result<T, BrowserError> {
        let value = self.evaluate(script).await?;
        serde_json::from_value(value).map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    async fn nth_element(
        &self,
        selector: &str,
        index: usize,
    ) -> Result<chromiumoxide::Element, BrowserError> {
        self.page
            .find_elements(selector)
            .await?
            .into_iter()
            .nth(index)
            .ok_or_else(|| BrowserError::NoElement(selector.to_string()))
    }
}

#[async_trait]
impl Page for ChromiumPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| {
                BrowserError::Timeout(format!(
                    "Navigation timeout of {} ms exceeded",
                    timeout.as_millis()
                ))
            })??;
        Ok(())
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.page.reload().await?;
        Ok(())
    }

    async fn url(&self) -> Result<String, BrowserError> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.page.content().await?)
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        let result = self.page.evaluate(script).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        visible: bool,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let predicate = if visible { VISIBLE_ELEMENT } else { "el => true" };
        let script = format!(
            "Array.from(document.querySelectorAll({})).some({})",
            js_string(selector),
            predicate
        );

        let deadline = Instant::now() + timeout;
        loop {
            // Errors while the document is being replaced count as "not yet"
            if self.eval_as::<bool>(&script).await.unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::selector_timeout(selector, timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), BrowserError> {
        tokio::time::timeout(timeout, self.page.wait_for_navigation())
            .await
            .map_err(|_| {
                BrowserError::Timeout(format!(
                    "Navigation timeout of {} ms exceeded",
                    timeout.as_millis()
                ))
            })??;
        Ok(())
    }

    async fn count(&self, selector: &str) -> Result<usize, BrowserError> {
        self.eval_as(&format!(
            "document.querySelectorAll({}).length",
            js_string(selector)
        ))
        .await
    }

    async fn click(&self, selector: &str, index: usize) -> Result<(), BrowserError> {
        self.nth_element(selector, index).await?.click().await?;
        Ok(())
    }

    async fn scroll_into_view(&self, selector: &str, index: usize) -> Result<(), BrowserError> {
        self.nth_element(selector, index)
            .await?
            .scroll_into_view()
            .await?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self.page.find_element(selector).await?;
        element.click().await?;
        element.type_str(text).await?;
        Ok(())
    }

    async fn texts(&self, selector: &str, attribute: Option<&str>) -> Result<Vec<Value>, BrowserError> {
        self.eval_as(&format!(
            "Array.from(document.querySelectorAll({})).map(el => ({})(el, {}))",
            js_string(selector),
            READ_ELEMENT,
            js_optional(attribute)
        ))
        .await
    }

    async fn child_texts(
        &self,
        parent: &str,
        child: &str,
        attribute: Option<&str>,
    ) -> Result<Vec<Vec<Value>>, BrowserError> {
        self.eval_as(&format!(
            "Array.from(document.querySelectorAll({})).map(p => \
                Array.from(p.querySelectorAll({})).map(el => ({})(el, {})))",
            js_string(parent),
            js_string(child),
            READ_ELEMENT,
            js_optional(attribute)
        ))
        .await
    }

    async fn first_content(&self, selector: &str, attribute: Option<&str>) -> Result<Option<String>, BrowserError> {
        self.eval_as(&format!(
            "(() => {{ const el = document.querySelector({}); const attr = {}; \
                if (!el) return null; return attr ? el.getAttribute(attr) : el.innerHTML; }})()",
            js_string(selector),
            js_optional(attribute)
        ))
        .await
    }

    async fn box_model(&self, selector: &str) -> Result<BoxModel, BrowserError> {
        let script = format!(
            "(() => {{
                const el = document.querySelector({});
                if (!el) return null;
                const r = el.getBoundingClientRect();
                const s = window.getComputedStyle(el);
                const px = v => parseFloat(v) || 0;
                const quad = (l, t, rt, b) => [{{x: l, y: t}}, {{x: rt, y: t}}, {{x: rt, y: b}}, {{x: l, y: b}}];
                const x = r.left + window.scrollX;
                const y = r.top + window.scrollY;
                return {{
                    border: quad(x, y, x + r.width, y + r.height),
                    margin: quad(x - px(s.marginLeft), y - px(s.marginTop),
                        x + r.width + px(s.marginRight), y + r.height + px(s.marginBottom)),
                    width: r.width,
                    height: r.height
                }};
            }})()",
            js_string(selector)
        );
        self.eval_as::<Option<BoxModel>>(&script)
            .await?
            .ok_or_else(|| BrowserError::NoElement(selector.to_string()))
    }

    async fn screenshot(&self, request: &ScreenshotRequest) -> Result<(), BrowserError> {
        let format = match request.format {
            ImageFormat::Png => CaptureScreenshotFormat::Png,
            ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        };
        let mut params = ScreenshotParams::builder()
            .format(format)
            .full_page(request.full_page);
        if let Some(clip) = request.clip {
            params = params.clip(Viewport {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
                scale: 1.0,
            });
        }

        let bytes = self.page.screenshot(params.build()).await?;
        tokio::fs::write(&request.path, bytes).await?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        Ok(self
            .page
            .get_cookies()
            .await?
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: c.expires,
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: Vec<Cookie>) -> Result<(), BrowserError> {
        let params = cookies
            .into_iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name, c.value);
                if !c.domain.is_empty() {
                    param.domain = Some(c.domain);
                }
                if !c.path.is_empty() {
                    param.path = Some(c.path);
                }
                if c.expires > 0.0 {
                    param.expires = Some(TimeSinceEpoch::new(c.expires));
                }
                param.secure = Some(c.secure);
                param.http_only = Some(c.http_only);
                param
            })
            .collect::<Vec<_>>();
        self.page.set_cookies(params).await?;
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<(), BrowserError> {
        self.page.bring_to_front().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.page.clone().close().await?;
        Ok(())
    }
}

//! Scripted in-memory browser for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    BoxModel, BrowserDriver, BrowserError, Cookie, Page, PageHandle, ScreenshotRequest,
};

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub text: String,
    pub inner_html: String,
    pub attributes: HashMap<String, String>,
    pub visible: bool,
    pub children: Vec<(String, FakeElement)>,
    pub box_model: BoxModel,
}

impl FakeElement {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            inner_html: text.to_string(),
            visible: true,
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn html(mut self, html: &str) -> Self {
        self.inner_html = html.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn child(mut self, selector: &str, element: FakeElement) -> Self {
        self.children.push((selector.to_string(), element));
        self
    }

    pub fn with_box(mut self, model: BoxModel) -> Self {
        self.box_model = model;
        self
    }

    fn read(&self, attribute: Option<&str>) -> Value {
        match attribute {
            Some(name) => self
                .attributes
                .get(name)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null),
            None => Value::String(self.text.clone()),
        }
    }
}

#[derive(Default)]
struct FakeState {
    url: String,
    title: String,
    elements: HashMap<String, Vec<FakeElement>>,
    cookies: Vec<Cookie>,
    events: Vec<String>,
    failures: HashMap<&'static str, VecDeque<String>>,
    closed: bool,
}

/// A page whose DOM is a selector-to-elements table.
#[derive(Default)]
pub struct FakePage {
    state: Mutex<FakeState>,
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                url: "about:blank".to_string(),
                ..Default::default()
            }),
        }
    }

    pub fn with_title(self, title: &str) -> Self {
        self.state.lock().title = title.to_string();
        self
    }

    pub fn with_element(self, selector: &str, element: FakeElement) -> Self {
        self.state
            .lock()
            .elements
            .entry(selector.to_string())
            .or_default()
            .push(element);
        self
    }

    pub fn with_cookies(self, cookies: Vec<Cookie>) -> Self {
        self.state.lock().cookies = cookies;
        self
    }

    /// Make the next call of `operation` fail with `message`
    pub fn fail_next(&self, operation: &'static str, message: &str) {
        self.state
            .lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(message.to_string());
    }

    /// Recorded interactions, e.g. `click #go[0]` or `type #user alice`
    pub fn events(&self) -> Vec<String> {
        self.state.lock().events.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn current_cookies(&self) -> Vec<Cookie> {
        self.state.lock().cookies.clone()
    }

    fn record(&self, operation: &'static str, event: String) -> Result<(), BrowserError> {
        let mut state = self.state.lock();
        if let Some(message) = state.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            return Err(BrowserError::Timeout(message));
        }
        state.events.push(event);
        Ok(())
    }

    fn matches(&self, selector: &str) -> Vec<FakeElement> {
        self.state
            .lock()
            .elements
            .get(selector)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        self.record("goto", format!("goto {}", url))?;
        self.state.lock().url = url.to_string();
        Ok(())
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.record("reload", "reload".to_string())
    }

    async fn url(&self) -> Result<String, BrowserError> {
        Ok(self.state.lock().url.clone())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        Ok(self.state.lock().title.clone())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        let state = self.state.lock();
        Ok(state
            .elements
            .values()
            .flatten()
            .map(|e| e.inner_html.clone())
            .collect::<Vec<_>>()
            .join(""))
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        self.record("evaluate", format!("evaluate {}", script))?;
        Ok(Value::Null)
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        visible: bool,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        self.record("wait", format!("wait {}", selector))?;
        let found = self
            .matches(selector)
            .iter()
            .any(|e| !visible || e.visible);
        if found {
            Ok(())
        } else {
            Err(BrowserError::selector_timeout(selector, timeout))
        }
    }

    async fn wait_for_navigation(&self, _timeout: Duration) -> Result<(), BrowserError> {
        self.record("navigation", "navigation".to_string())
    }

    async fn count(&self, selector: &str) -> Result<usize, BrowserError> {
        Ok(self.matches(selector).len())
    }

    async fn click(&self, selector: &str, index: usize) -> Result<(), BrowserError> {
        if self.matches(selector).len() <= index {
            return Err(BrowserError::NoElement(selector.to_string()));
        }
        self.record("click", format!("click {}[{}]", selector, index))
    }

    async fn scroll_into_view(&self, selector: &str, index: usize) -> Result<(), BrowserError> {
        self.record("scroll", format!("scroll {}[{}]", selector, index))
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        if self.matches(selector).is_empty() {
            return Err(BrowserError::NoElement(selector.to_string()));
        }
        self.record("type", format!("type {} {}", selector, text))
    }

    async fn texts(&self, selector: &str, attribute: Option<&str>) -> Result<Vec<Value>, BrowserError> {
        Ok(self
            .matches(selector)
            .iter()
            .map(|e| e.read(attribute))
            .collect())
    }

    async fn child_texts(
        &self,
        parent: &str,
        child: &str,
        attribute: Option<&str>,
    ) -> Result<Vec<Vec<Value>>, BrowserError> {
        Ok(self
            .matches(parent)
            .iter()
            .map(|p| {
                p.children
                    .iter()
                    .filter(|(selector, _)| selector == child)
                    .map(|(_, e)| e.read(attribute))
                    .collect()
            })
            .collect())
    }

    async fn first_content(&self, selector: &str, attribute: Option<&str>) -> Result<Option<String>, BrowserError> {
        Ok(self.matches(selector).first().and_then(|e| match attribute {
            Some(name) => e.attributes.get(name).cloned(),
            None => Some(e.inner_html.clone()),
        }))
    }

    async fn box_model(&self, selector: &str) -> Result<BoxModel, BrowserError> {
        self.matches(selector)
            .first()
            .map(|e| e.box_model.clone())
            .ok_or_else(|| BrowserError::NoElement(selector.to_string()))
    }

    async fn screenshot(&self, request: &ScreenshotRequest) -> Result<(), BrowserError> {
        self.record(
            "screenshot",
            format!("screenshot {} {:?}", request.path.display(), request.clip),
        )?;
        tokio::fs::write(&request.path, b"fake image").await?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        Ok(self.state.lock().cookies.clone())
    }

    async fn set_cookies(&self, cookies: Vec<Cookie>) -> Result<(), BrowserError> {
        self.record("cookies", format!("set_cookies {}", cookies.len()))?;
        self.state.lock().cookies = cookies;
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<(), BrowserError> {
        self.record("front", "bring_to_front".to_string())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Hands out queued pages first, then blank ones. Keeps every page it made.
#[derive(Default)]
pub struct FakeBrowser {
    queued: Mutex<VecDeque<Arc<FakePage>>>,
    created: Mutex<Vec<Arc<FakePage>>>,
    closed: AtomicBool,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, page: Arc<FakePage>) -> Self {
        self.queued.lock().push_back(page);
        self
    }

    pub fn created(&self) -> Vec<Arc<FakePage>> {
        self.created.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn new_page(&self) -> Result<PageHandle, BrowserError> {
        let page = self
            .queued
            .lock()
            .pop_front()
            .unwrap_or_else(|| Arc::new(FakePage::new()));
        self.created.lock().push(page.clone());
        Ok(page)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

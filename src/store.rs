use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::browser::PageHandle;
use crate::config::{
    ACTIVE_PAGE_KEY, BASE_DIR_KEY, CURRENT_DIR_KEY, ENV_PREFIX, INDENT_KEY, INDENT_STEP, INPUT_KEY,
    PAGES_KEY, PAYLOAD_ID_KEY,
};

#[derive(Default)]
struct Memory {
    values: HashMap<String, Value>,
    pages: BTreeMap<String, PageHandle>,
    active_page: Option<PageHandle>,
}

/// Per-run key/value memory.
///
/// Values are owned by the store: `put` takes the value by move, so the caller
/// keeps nothing it could mutate behind the store's back, and `get` hands out
/// a clone. Accumulators (`push`, `update`) mutate in place.
///
/// Page handles do not fit in a JSON value and live in their own slots;
/// `get(PAGES)` returns the page labels and `get(ACTIVE_PAGE)` the label of the
/// active page.
///
/// The lock is never held across an await point.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<Memory>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with every `GRABBER_*` pair from `vars`, prefix stripped.
    pub fn seeded<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let store = Self::new();
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(ENV_PREFIX) {
                if !key.is_empty() {
                    store.put(key, Value::String(value));
                }
            }
        }
        store
    }

    pub fn from_env() -> Self {
        Self::seeded(std::env::vars())
    }

    pub fn put(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if key == PAGES_KEY || key == ACTIVE_PAGE_KEY {
            tracing::warn!(key = %key, "Page slots are managed through page handles; ignoring write");
            return;
        }
        self.inner.lock().values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let memory = self.inner.lock();
        match key {
            PAGES_KEY => Some(Value::Array(
                memory.pages.keys().cloned().map(Value::String).collect(),
            )),
            ACTIVE_PAGE_KEY => memory.active_page.as_ref().and_then(|active| {
                memory
                    .pages
                    .iter()
                    .find(|(_, page)| Arc::ptr_eq(page, active))
                    .map(|(label, _)| Value::String(label.clone()))
            }),
            _ => memory.values.get(key).cloned(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().values.contains_key(key)
    }

    /// Remove a key, returning what was stored
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.lock().values.remove(key)
    }

    /// Run `f` against the stored value in place
    pub fn update<R>(&self, key: &str, f: impl FnOnce(Option<&mut Value>) -> R) -> R {
        let mut memory = self.inner.lock();
        f(memory.values.get_mut(key))
    }

    /// Append to the sequence under `key`, creating it when absent.
    /// A non-sequence value is wrapped so the old value is kept as the first element.
    pub fn push(&self, key: &str, value: Value) {
        let mut memory = self.inner.lock();
        match memory.values.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            Some(other) => {
                let previous = other.take();
                *other = Value::Array(vec![previous, value]);
            }
            None => {
                memory.values.insert(key.to_string(), Value::Array(vec![value]));
            }
        }
    }

    pub fn input(&self) -> Option<Value> {
        self.get(INPUT_KEY)
    }

    pub fn set_input(&self, value: Value) {
        self.put(INPUT_KEY, value);
    }

    /* ---- pages ---- */

    pub fn insert_page(&self, label: impl Into<String>, page: PageHandle) {
        self.inner.lock().pages.insert(label.into(), page);
    }

    pub fn remove_page(&self, label: &str) -> Option<PageHandle> {
        let mut memory = self.inner.lock();
        let page = memory.pages.remove(label)?;
        if matches!(&memory.active_page, Some(active) if Arc::ptr_eq(active, &page)) {
            memory.active_page = None;
        }
        Some(page)
    }

    pub fn page(&self, label: &str) -> Option<PageHandle> {
        self.inner.lock().pages.get(label).cloned()
    }

    /// Make the page under `label` the active one. Returns false if no such page.
    pub fn activate_page(&self, label: &str) -> bool {
        let mut memory = self.inner.lock();
        match memory.pages.get(label).cloned() {
            Some(page) => {
                memory.active_page = Some(page);
                true
            }
            None => false,
        }
    }

    pub fn active_page(&self) -> Option<PageHandle> {
        self.inner.lock().active_page.clone()
    }

    /// Detach every page from the store, leaving no active page
    pub fn take_pages(&self) -> Vec<(String, PageHandle)> {
        let mut memory = self.inner.lock();
        memory.active_page = None;
        std::mem::take(&mut memory.pages).into_iter().collect()
    }

    /* ---- scope metadata ---- */

    pub fn indent(&self) -> usize {
        self.get(INDENT_KEY)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(0)
    }

    pub fn set_indent(&self, indent: usize) {
        self.put(INDENT_KEY, Value::from(indent));
    }

    /// Increase the indentation for the lifetime of the returned guard
    pub fn indent_guard(&self) -> IndentGuard {
        self.set_indent(self.indent() + INDENT_STEP);
        IndentGuard {
            store: self.clone(),
        }
    }

    pub fn base_dir(&self) -> Option<PathBuf> {
        self.path(BASE_DIR_KEY)
    }

    pub fn current_dir(&self) -> Option<PathBuf> {
        self.path(CURRENT_DIR_KEY)
    }

    pub fn set_base_dir(&self, dir: &std::path::Path) {
        self.put(BASE_DIR_KEY, Value::String(dir.display().to_string()));
    }

    pub fn set_current_dir(&self, dir: &std::path::Path) {
        self.put(CURRENT_DIR_KEY, Value::String(dir.display().to_string()));
    }

    pub fn payload_id(&self) -> Option<String> {
        self.get(PAYLOAD_ID_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key)
            .and_then(|v| v.as_str().map(PathBuf::from))
    }
}

/// Restores the indentation on drop, whether the block finished or failed.
pub struct IndentGuard {
    store: Store,
}

impl Drop for IndentGuard {
    fn drop(&mut self) {
        let indent = self.store.indent();
        self.store.set_indent(indent.saturating_sub(INDENT_STEP));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakePage;
    use serde_json::json;

    #[test]
    fn test_put_is_isolated_from_caller_mutation() {
        let store = Store::new();
        let mut value = json!({"items": [1, 2]});
        store.put("K", value.clone());
        value["items"].as_array_mut().unwrap().push(json!(3));

        assert_eq!(store.get("K").unwrap(), json!({"items": [1, 2]}));
    }

    #[test]
    fn test_get_remove_and_absent() {
        let store = Store::new();
        assert!(store.get("missing").is_none());
        store.put("A", json!(1));
        assert_eq!(store.remove("A"), Some(json!(1)));
        assert!(!store.contains("A"));
    }

    #[test]
    fn test_push_creates_and_appends() {
        let store = Store::new();
        store.push("LIST", json!("a"));
        store.push("LIST", json!("b"));
        assert_eq!(store.get("LIST").unwrap(), json!(["a", "b"]));

        store.put("SCALAR", json!(1));
        store.push("SCALAR", json!(2));
        assert_eq!(store.get("SCALAR").unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_seeded_strips_prefix() {
        let store = Store::seeded(vec![
            ("GRABBER_USER".to_string(), "alice".to_string()),
            ("HOME".to_string(), "/root".to_string()),
            ("GRABBER_".to_string(), "empty".to_string()),
        ]);
        assert_eq!(store.get("USER").unwrap(), json!("alice"));
        assert!(store.get("HOME").is_none());
        assert!(store.get("").is_none());
    }

    #[test]
    fn test_indent_guard_restores_on_drop() {
        let store = Store::new();
        store.set_indent(0);
        {
            let _outer = store.indent_guard();
            assert_eq!(store.indent(), 2);
            {
                let _inner = store.indent_guard();
                assert_eq!(store.indent(), 4);
            }
            assert_eq!(store.indent(), 2);
        }
        assert_eq!(store.indent(), 0);
    }

    #[test]
    fn test_pages_and_active_page() {
        let store = Store::new();
        let page: PageHandle = Arc::new(FakePage::new());
        store.insert_page("default", page.clone());
        assert!(store.activate_page("default"));
        assert!(!store.activate_page("nope"));
        assert_eq!(store.get(PAGES_KEY).unwrap(), json!(["default"]));
        assert_eq!(store.get(ACTIVE_PAGE_KEY).unwrap(), json!("default"));

        store.put(PAGES_KEY, json!({}));
        assert_eq!(store.get(PAGES_KEY).unwrap(), json!(["default"]));

        assert!(store.remove_page("default").is_some());
        assert!(store.active_page().is_none());
        assert!(store.take_pages().is_empty());
    }
}

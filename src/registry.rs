use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::errors::{ActionError, ConfigError};
use crate::execution::RunContext;

pub type Params = Map<String, Value>;
pub type ActionResult = Result<(), ActionError>;

/// A named operation. Handlers receive their resolved params by value; the
/// same params are also visible under `PARAMS` in the store.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn run(&self, cx: RunContext, params: Params) -> ActionResult;
}

#[async_trait]
impl<F, Fut> ActionHandler for F
where
    F: Fn(RunContext, Params) -> Fut + Send + Sync,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    async fn run(&self, cx: RunContext, params: Params) -> ActionResult {
        (self)(cx, params).await
    }
}

/// Name-indexed handlers in two layers: built-ins, then extensions.
/// A name lives in at most one layer.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    builtins: HashMap<String, Arc<dyn ActionHandler>>,
    extensions: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in action
    pub fn with_builtins() -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        crate::actions::register_builtins(&mut registry)?;
        Ok(registry)
    }

    pub fn register_builtin<H>(&mut self, name: &str, handler: H) -> Result<(), ConfigError>
    where
        H: ActionHandler + 'static,
    {
        self.ensure_free(name)?;
        self.builtins.insert(name.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Add a user action. Fails if the name is already taken in either layer.
    pub fn extend<H>(&mut self, name: &str, handler: H) -> Result<(), ConfigError>
    where
        H: ActionHandler + 'static,
    {
        self.ensure_free(name)?;
        self.extensions.insert(name.to_string(), Arc::new(handler));
        tracing::debug!(action = name, "Registered extension action");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.builtins
            .get(name)
            .or_else(|| self.extensions.get(name))
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builtins.contains_key(name) || self.extensions.contains_key(name)
    }

    pub fn is_extension(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.builtins.len() + self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_free(&self, name: &str) -> Result<(), ConfigError> {
        if self.contains(name) {
            Err(ConfigError::DuplicateAction(name.to_string()))
        } else {
            Ok(())
        }
    }
}

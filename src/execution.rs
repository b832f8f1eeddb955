use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use crate::browser::{BrowserDriver, PageHandle};
use crate::config::{Settings, DEFAULT_PAGE_KEY, PARAMS_KEY, PAYLOAD_ID_KEY};
use crate::errors::ActionError;
use crate::interpolation::interpolate;
use crate::logger::Logger;
use crate::models::{Grab, GrabAction};
use crate::registry::{ActionHandler, ActionRegistry, Params};
use crate::schemas;
use crate::store::Store;

type BlockFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send + 'a>>;
/// Handler, resolved params and the page active when the action was reached
type Prepared = (Arc<dyn ActionHandler>, Params, Option<PageHandle>);

/// Process-wide state shared by every run: the action registry, the browser
/// and the settings. Cheap to share behind an `Arc`.
pub struct ExecutionEngine {
    registry: ActionRegistry,
    browser: Arc<dyn BrowserDriver>,
    settings: Settings,
    logger: Logger,
    http: reqwest::Client,
}

impl ExecutionEngine {
    pub fn new(registry: ActionRegistry, browser: Arc<dyn BrowserDriver>, settings: Settings) -> Self {
        Self {
            registry,
            browser,
            settings,
            logger: Logger::new(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn browser(&self) -> &Arc<dyn BrowserDriver> {
        &self.browser
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Run `grabs` (only the one named `selection`, if given) against a fresh
    /// store.
    ///
    /// Pages opened during the run are closed whether it succeeds or not. With
    /// a `payload_id` the result is `{ "result": <INPUT> }`.
    pub async fn run(
        self: &Arc<Self>,
        grabs: &[Grab],
        selection: Option<&str>,
        payload_id: Option<&str>,
    ) -> Result<Option<Value>, ActionError> {
        // 1) Fresh store, seeded from the environment
        let store = Store::from_env();
        if let Some(id) = payload_id {
            store.put(PAYLOAD_ID_KEY, Value::String(id.to_string()));
        }
        let cx = RunContext::new(self.clone(), store.clone());

        // 2) Default page
        let page = self
            .browser
            .new_page()
            .await
            .map_err(|e| ActionError::runtime("newPage", e.to_string()))?;
        store.insert_page(DEFAULT_PAGE_KEY, page);
        store.activate_page(DEFAULT_PAGE_KEY);

        // 3) Grabs
        let outcome = cx.run_grabs(grabs, selection).await;
        if let Err(err) = &outcome {
            tracing::error!(error = %err, kind = err.kind(), request_id = ?payload_id, "Grab failed");
            self.logger.error(payload_id, &err.to_string());
        }

        // 4) Teardown
        cx.close_pages().await;
        store.set_indent(0);
        cx.display("Grabber finished");

        outcome?;
        Ok(payload_id.map(|_| json!({ "result": store.input().unwrap_or(Value::Null) })))
    }
}

/// Print name and description of the selected grabs without running them
pub fn print_help(logger: &Logger, grabs: &[Grab], selection: Option<&str>) {
    for grab in grabs
        .iter()
        .filter(|g| selection.map_or(true, |name| name == g.name))
    {
        logger.banner(&format!("Grab : {}", grab.name));
        logger.banner(&format!("Description : {}", grab.description_or_default()));
    }
}

/// What a handler sees: the engine, the run's store and the page that was
/// active when the action was dispatched.
#[derive(Clone)]
pub struct RunContext {
    engine: Arc<ExecutionEngine>,
    store: Store,
    page: Option<PageHandle>,
}

impl RunContext {
    pub fn new(engine: Arc<ExecutionEngine>, store: Store) -> Self {
        Self {
            engine,
            store,
            page: None,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn settings(&self) -> &Settings {
        &self.engine.settings
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.engine.http
    }

    /// The page active at dispatch time
    pub fn page(&self, action: &str) -> Result<PageHandle, ActionError> {
        self.page
            .clone()
            .ok_or_else(|| ActionError::runtime(action, "No active page"))
    }

    /// Print a line at the current indentation
    pub fn display(&self, text: &str) {
        self.engine.logger.display(
            self.store.indent(),
            self.store.payload_id().as_deref(),
            text,
        );
    }

    /// Perform the named action with `params`, through the full pipeline
    pub async fn invoke(&self, name: &str, params: Value) -> Result<(), ActionError> {
        self.perform(&GrabAction::new(name, params)).await
    }

    /// Interpolate, validate and dispatch one action
    pub async fn perform(&self, action: &GrabAction) -> Result<(), ActionError> {
        let (handler, params, page) = self.prepare(action)?;
        self.dispatch(&action.name, handler, params, page).await
    }

    /// Run a nested body in order. Deferred actions inside a body run
    /// synchronously.
    pub fn run_block<'a>(&'a self, actions: &'a [GrabAction]) -> BlockFuture<'a> {
        Box::pin(async move {
            for action in actions {
                self.perform(action).await?;
            }
            Ok(())
        })
    }

    async fn run_grabs(&self, grabs: &[Grab], selection: Option<&str>) -> Result<(), ActionError> {
        let mut pending = JoinSet::new();

        for grab in grabs {
            if selection.is_some_and(|name| name != grab.name) {
                continue;
            }
            self.store.set_indent(0);
            self.display(&format!("Grabbing {}", grab.name));
            tracing::info!(grab = %grab.name, actions = grab.actions.len(), "Grabbing");

            self.invoke("setBaseDir", json!({ "dir": grab.name })).await?;
            self.invoke("resetCurrentDir", json!({})).await?;

            for action in &grab.actions {
                if action.await_ {
                    self.perform(action).await?;
                } else {
                    // Params and page are resolved now; only completion is deferred
                    let (handler, params, page) = self.prepare(action)?;
                    let cx = self.clone();
                    let name = action.name.clone();
                    pending.spawn(async move { cx.dispatch(&name, handler, params, page).await });
                }
            }
        }

        let mut failures = Vec::new();
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.push(err),
                Err(err) => failures.push(ActionError::runtime("deferred", err.to_string())),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ActionError::Deferred(failures))
        }
    }

    fn prepare(&self, action: &GrabAction) -> Result<Prepared, ActionError> {
        self.display(&format!("Running action : {}", action.name));

        // 1) Raw params
        let raw = action.params_or_empty();
        self.store.put(PARAMS_KEY, Value::Object(raw.clone()));

        // 2) Interpolate
        let params = interpolate(&raw, &self.store);
        self.store.put(PARAMS_KEY, Value::Object(params.clone()));

        // 3) Validate
        let params = schemas::validate_params(&action.name, params).map_err(|err| {
            tracing::error!(action = %action.name, error = %err, "Parameter validation failed");
            err
        })?;
        self.store.put(PARAMS_KEY, Value::Object(params.clone()));

        // 4) Resolve
        let handler = self
            .engine
            .registry
            .get(&action.name)
            .ok_or_else(|| ActionError::UnknownAction(action.name.clone()))?;
        Ok((handler, params, self.store.active_page()))
    }

    async fn dispatch(
        &self,
        name: &str,
        handler: Arc<dyn ActionHandler>,
        params: Params,
        page: Option<PageHandle>,
    ) -> Result<(), ActionError> {
        let started = Instant::now();
        tracing::debug!(action = name, "Starting action");

        let cx = RunContext {
            page,
            ..self.clone()
        };
        let result = handler.run(cx, params).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => tracing::info!(action = name, duration_ms, "Action completed"),
            Err(err) => tracing::error!(
                action = name,
                duration_ms,
                kind = err.kind(),
                error = %err,
                "Action failed"
            ),
        }
        result
    }

    async fn close_pages(&self) {
        for (label, page) in self.store.take_pages() {
            if let Err(e) = page.close().await {
                tracing::warn!(page = %label, error = %e, "Failed to close page");
            }
        }
    }
}

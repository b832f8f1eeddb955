pub mod actions;
pub mod browser;
pub mod config;
pub mod errors;
pub mod execution;
pub mod expression;
pub mod interpolation;
pub mod loader;
pub mod logger;
pub mod models;
pub mod paths;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod schemas;
pub mod server;
pub mod store;

pub use errors::{ActionError, ConfigError};
pub use execution::{ExecutionEngine, RunContext};
pub use models::{Grab, GrabAction};
pub use registry::ActionRegistry;

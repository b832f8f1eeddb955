use thiserror::Error;

use crate::expression::ExpressionError;

/// Failures that stop the process before any grab runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No grabs found nor provided")]
    NoGrabs,
    #[error("Grab {0} not found")]
    UnknownGrab(String),
    #[error("Action {0} already exists")]
    DuplicateAction(String),
    #[error("Invalid grab {name}:\n{details}")]
    InvalidGrab { name: String, details: String },
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures raised while dispatching a single action.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("[{action}] Validation failed:\n{details}")]
    Validation { action: String, details: String },

    #[error("[{action}] Selector not found or not visible: {selector}{}", reason_suffix(.reason))]
    Selector {
        action: String,
        selector: String,
        reason: Option<String>,
    },

    #[error("[{action}] Network request failed: {url} ({reason})")]
    Network {
        action: String,
        url: String,
        reason: String,
    },

    #[error("[{action}] File system {operation} failed: {path} ({source})")]
    FileSystem {
        action: String,
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{action}] {source}")]
    Expression {
        action: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Unknown action: \"{0}\"")]
    UnknownAction(String),

    #[error("[{action}] {message}")]
    Runtime { action: String, message: String },

    #[error("{} deferred action(s) failed: {}", .0.len(), join_errors(.0))]
    Deferred(Vec<ActionError>),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map(|r| format!(" ({})", r)).unwrap_or_default()
}

fn join_errors(errors: &[ActionError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ActionError {
    pub fn runtime(action: &str, message: impl Into<String>) -> Self {
        ActionError::Runtime {
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn selector(action: &str, selector: &str, reason: Option<String>) -> Self {
        ActionError::Selector {
            action: action.to_string(),
            selector: selector.to_string(),
            reason,
        }
    }

    pub fn network(action: &str, url: &str, reason: impl ToString) -> Self {
        ActionError::Network {
            action: action.to_string(),
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn fs(
        action: &str,
        operation: &'static str,
        path: impl AsRef<std::path::Path>,
        source: std::io::Error,
    ) -> Self {
        ActionError::FileSystem {
            action: action.to_string(),
            operation,
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn expression(action: &str, source: ExpressionError) -> Self {
        ActionError::Expression {
            action: action.to_string(),
            source,
        }
    }

    /// Short category name used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::Validation { .. } => "ValidationError",
            ActionError::Selector { .. } => "SelectorError",
            ActionError::Network { .. } => "NetworkError",
            ActionError::FileSystem { .. } => "FileSystemError",
            ActionError::Expression { .. } => "ExpressionError",
            ActionError::UnknownAction(_) => "UnknownAction",
            ActionError::Runtime { .. } => "ActionError",
            ActionError::Deferred(_) => "DeferredError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_messages() {
        let err = ActionError::selector("click", "#go", None);
        assert_eq!(err.to_string(), "[click] Selector not found or not visible: #go");

        let err = ActionError::selector("click", "#go", Some("timeout 5000ms exceeded".into()));
        assert!(err.to_string().ends_with("(timeout 5000ms exceeded)"));

        let err = ActionError::network("login", "https://example.com", "net::ERR_NAME_NOT_RESOLVED");
        assert_eq!(
            err.to_string(),
            "[login] Network request failed: https://example.com (net::ERR_NAME_NOT_RESOLVED)"
        );
        assert_eq!(err.kind(), "NetworkError");

        let err = ActionError::UnknownAction("frobnicate".into());
        assert_eq!(err.to_string(), "Unknown action: \"frobnicate\"");
    }

    #[test]
    fn test_deferred_error_aggregates() {
        let err = ActionError::Deferred(vec![
            ActionError::runtime("a", "first"),
            ActionError::runtime("b", "second"),
        ]);
        assert_eq!(err.to_string(), "2 deferred action(s) failed: [a] first; [b] second");
    }

    #[test]
    fn test_config_error_messages() {
        assert_eq!(ConfigError::UnknownGrab("x".into()).to_string(), "Grab x not found");
        assert_eq!(
            ConfigError::DuplicateAction("log".into()).to_string(),
            "Action log already exists"
        );
    }
}

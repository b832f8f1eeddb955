use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;
use crate::models::Grab;
use crate::registry::ActionRegistry;
use crate::schemas;

const RECIPE_EXTENSIONS: &[&str] = &["yml", "yaml", "json"];

/// Check a recipe document and turn it into a [`Grab`].
///
/// Every violated rule is listed in the error, one `  - path: message` line each.
pub fn parse_grab(document: &Value, registry: &ActionRegistry) -> Result<Grab, ConfigError> {
    let name = document
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string();

    let issues = schemas::check_grab(document, &|action| registry.contains(action));
    if !issues.is_empty() {
        return Err(ConfigError::InvalidGrab {
            name,
            details: schemas::format_issues(&issues),
        });
    }
    serde_json::from_value(document.clone()).map_err(|e| ConfigError::InvalidGrab {
        name,
        details: format!("  - root: {}", e),
    })
}

fn read_document(path: &Path, raw: &str) -> Result<Value, String> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(raw).map_err(|e| e.to_string()),
        _ => serde_yaml::from_str(raw).map_err(|e| e.to_string()),
    }
}

async fn recipe_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: dir.display().to_string(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        let is_recipe = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| RECIPE_EXTENSIONS.contains(&e))
            .unwrap_or(false);
        if is_recipe && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load every recipe of `dir` in file-name order.
///
/// Unreadable or invalid recipes and repeated names are skipped with a
/// warning. Finding nothing usable is an error.
pub async fn load_grabs(dir: &Path, registry: &ActionRegistry) -> Result<Vec<Grab>, ConfigError> {
    let mut grabs = Vec::new();
    let mut seen = HashSet::new();

    for path in recipe_files(dir).await? {
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable recipe");
                continue;
            }
        };
        let document = match read_document(&path, &raw) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Skipping malformed recipe");
                continue;
            }
        };
        let grab = match parse_grab(&document, registry) {
            Ok(grab) => grab,
            Err(e) => {
                tracing::warn!(file = %path.display(), "{}", e);
                continue;
            }
        };
        if !seen.insert(grab.name.clone()) {
            tracing::warn!(file = %path.display(), grab = %grab.name, "Duplicate grab name, skipping");
            continue;
        }
        tracing::debug!(file = %path.display(), grab = %grab.name, "Loaded grab");
        grabs.push(grab);
    }

    if grabs.is_empty() {
        return Err(ConfigError::NoGrabs);
    }
    tracing::info!(count = grabs.len(), dir = %dir.display(), "Grabs loaded");
    Ok(grabs)
}

/// Keep only the grab called `name`, when one is given
pub fn select(grabs: Vec<Grab>, name: Option<&str>) -> Result<Vec<Grab>, ConfigError> {
    match name {
        None => Ok(grabs),
        Some(name) => {
            let selected: Vec<Grab> = grabs.into_iter().filter(|g| g.name == name).collect();
            if selected.is_empty() {
                Err(ConfigError::UnknownGrab(name.to_string()))
            } else {
                Ok(selected)
            }
        }
    }
}

use futures_util::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{is_truthy, opt_bool, opt_str, str_param, text_of};
use crate::config::INPUT_KEY;
use crate::errors::{ActionError, ConfigError};
use crate::execution::RunContext;
use crate::paths;
use crate::registry::{ActionRegistry, ActionResult, Params};

pub fn register(registry: &mut ActionRegistry) -> Result<(), ConfigError> {
    registry.register_builtin("setBaseDir", set_base_dir)?;
    registry.register_builtin("setCurrentDir", set_current_dir)?;
    registry.register_builtin("resetCurrentDir", reset_current_dir)?;
    registry.register_builtin("backToParentDir", back_to_parent_dir)?;
    registry.register_builtin("createDir", create_dir)?;
    registry.register_builtin("deleteFolder", delete_folder)?;
    registry.register_builtin("listFolders", list_folders)?;
    registry.register_builtin("createFile", create_file)?;
    registry.register_builtin("readFromText", read_from_text)?;
    registry.register_builtin("saveToText", save_to_text)?;
    registry.register_builtin("appendToText", append_to_text)?;
    registry.register_builtin("deleteFile", delete_file)?;
    registry.register_builtin("fileExists", file_exists)?;
    registry.register_builtin("checkStringInFile", check_string_in_file)?;
    registry.register_builtin("download", download)?;
    Ok(())
}

fn base_dir(cx: &RunContext, action: &str) -> Result<PathBuf, ActionError> {
    cx.store()
        .base_dir()
        .ok_or_else(|| ActionError::runtime(action, "No base directory set"))
}

fn current_dir(cx: &RunContext, action: &str) -> Result<PathBuf, ActionError> {
    match cx.store().current_dir() {
        Some(dir) => Ok(dir),
        None => base_dir(cx, action),
    }
}

/// `relative` joined onto `dir`, which must stay inside the base directory
fn resolve(cx: &RunContext, action: &str, dir: &Path, relative: &str) -> Result<PathBuf, ActionError> {
    let base = base_dir(cx, action)?;
    paths::confine(&base, dir, relative)
        .ok_or_else(|| ActionError::runtime(action, format!("Path {} leaves the base directory", relative)))
}

/// `<current>/<name>` inside the base directory
fn in_current(cx: &RunContext, action: &str, name: &str) -> Result<PathBuf, ActionError> {
    let current = current_dir(cx, action)?;
    resolve(cx, action, &current, name)
}

fn text_file(cx: &RunContext, action: &str, filename: &str) -> Result<PathBuf, ActionError> {
    in_current(cx, action, &format!("{}.txt", filename))
}

/// What a stored value looks like on disk: sequences one element per line
fn file_content(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(text_of).collect::<Vec<_>>().join("\n"),
        other => text_of(other),
    }
}

async fn set_base_dir(cx: RunContext, params: Params) -> ActionResult {
    let dir = str_param("setBaseDir", &params, "dir")?;
    let resources = paths::absolute(&cx.settings().resources_dir)
        .map_err(|e| ActionError::fs("setBaseDir", "resolve", &cx.settings().resources_dir, e))?;
    let base = paths::grab_dir(&resources, dir)
        .ok_or_else(|| ActionError::runtime("setBaseDir", format!("Invalid directory name: {}", dir)))?;

    fs::create_dir_all(&base)
        .await
        .map_err(|e| ActionError::fs("setBaseDir", "mkdir", &base, e))?;
    cx.store().set_base_dir(&base);
    cx.store().set_current_dir(&base);
    tracing::debug!(base_dir = %base.display(), "Base directory set");
    Ok(())
}

async fn set_current_dir(cx: RunContext, params: Params) -> ActionResult {
    let dir = paths::sanitize(str_param("setCurrentDir", &params, "dir")?);
    let from = if opt_bool(&params, "useBaseDir").unwrap_or(false) {
        base_dir(&cx, "setCurrentDir")?
    } else {
        current_dir(&cx, "setCurrentDir")?
    };
    let target = resolve(&cx, "setCurrentDir", &from, &dir)?;
    if !fs::metadata(&target).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(ActionError::runtime("setCurrentDir", format!("Directory {} does not exist", dir)));
    }

    cx.display(&format!(": Setting current dir to {}", dir));
    cx.store().set_current_dir(&target);
    Ok(())
}

async fn reset_current_dir(cx: RunContext, _params: Params) -> ActionResult {
    let base = base_dir(&cx, "resetCurrentDir")?;
    cx.store().set_current_dir(&base);
    Ok(())
}

async fn back_to_parent_dir(cx: RunContext, _params: Params) -> ActionResult {
    let base = base_dir(&cx, "backToParentDir")?;
    let current = current_dir(&cx, "backToParentDir")?;
    cx.store().set_current_dir(&paths::parent_within(&base, &current));
    Ok(())
}

async fn create_dir(cx: RunContext, params: Params) -> ActionResult {
    let dir = paths::sanitize(str_param("createDir", &params, "dir")?);
    cx.display(&format!(": Creating directory {}", dir));
    let from = if opt_bool(&params, "useBaseDir").unwrap_or(false) {
        base_dir(&cx, "createDir")?
    } else {
        current_dir(&cx, "createDir")?
    };
    let target = resolve(&cx, "createDir", &from, &dir)?;
    fs::create_dir_all(&target)
        .await
        .map_err(|e| ActionError::fs("createDir", "mkdir", &target, e))
}

async fn delete_folder(cx: RunContext, params: Params) -> ActionResult {
    let name = str_param("deleteFolder", &params, "foldername")?;
    let target = in_current(&cx, "deleteFolder", name)?;
    cx.display(&format!(": Deleting folder {}", target.display()));
    if target == base_dir(&cx, "deleteFolder")? {
        return Err(ActionError::runtime("deleteFolder", "Refusing to delete the base directory"));
    }

    if fs::try_exists(&target).await.unwrap_or(false) {
        fs::remove_dir_all(&target)
            .await
            .map_err(|e| ActionError::fs("deleteFolder", "rmdir", &target, e))?;
    }
    Ok(())
}

async fn list_folders(cx: RunContext, _params: Params) -> ActionResult {
    let current = current_dir(&cx, "listFolders")?;
    cx.display(&format!(": Listing folders {}", current.display()));

    let mut entries = fs::read_dir(&current)
        .await
        .map_err(|e| ActionError::fs("listFolders", "readdir", &current, e))?;
    let mut folders = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ActionError::fs("listFolders", "readdir", &current, e))?
    {
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            folders.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    folders.sort();
    cx.store().set_input(Value::from(folders));
    Ok(())
}

async fn append(action: &str, path: &Path, content: &str) -> ActionResult {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| ActionError::fs(action, "open", path, e))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| ActionError::fs(action, "write", path, e))?;
    file.flush().await.map_err(|e| ActionError::fs(action, "write", path, e))
}

async fn create_file(cx: RunContext, params: Params) -> ActionResult {
    let filename = str_param("createFile", &params, "filename")?;
    let path = text_file(&cx, "createFile", filename)?;
    cx.display(&format!(": Creating file {}", path.display()));
    append("createFile", &path, opt_str(&params, "content").unwrap_or("")).await
}

async fn read_from_text(cx: RunContext, params: Params) -> ActionResult {
    let filename = str_param("readFromText", &params, "filename")?;
    let path = text_file(&cx, "readFromText", filename)?;
    cx.display(&format!(": Loading file {}", path.display()));

    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| ActionError::fs("readFromText", "read", &path, e))?;
    let value = if opt_bool(&params, "breakLine").unwrap_or(false) {
        Value::from(content.split('\n').collect::<Vec<_>>())
    } else {
        Value::String(content)
    };
    cx.store().set_input(value);
    Ok(())
}

async fn save_to_text(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("saveToText", &params, "key")?;
    let filename = str_param("saveToText", &params, "filename")?;
    let content = cx.store().get(key);
    if !is_truthy(content.as_ref()) {
        return Ok(());
    }
    let content = content.as_ref().map(file_content).unwrap_or_default();

    let path = text_file(&cx, "saveToText", filename)?;
    cx.display(&format!(": Saving {}", path.display()));
    fs::write(&path, content)
        .await
        .map_err(|e| ActionError::fs("saveToText", "write", &path, e))
}

async fn append_to_text(cx: RunContext, params: Params) -> ActionResult {
    let key = str_param("appendToText", &params, "key")?;
    let filename = str_param("appendToText", &params, "filename")?;
    let content = match cx.store().get(key) {
        Some(value) if is_truthy(Some(&value)) => value,
        _ => return Ok(()),
    };
    let content = match &content {
        Value::Array(_) => file_content(&content),
        other => format!("{}\n", text_of(other)),
    };

    let path = text_file(&cx, "appendToText", filename)?;
    cx.display(&format!(": Appending to {}", path.display()));
    append("appendToText", &path, &content).await
}

async fn delete_file(cx: RunContext, params: Params) -> ActionResult {
    let filename = str_param("deleteFile", &params, "filename")?;
    let path = text_file(&cx, "deleteFile", filename)?;
    cx.display(&format!(": Deleting file {}", path.display()));
    if fs::try_exists(&path).await.unwrap_or(false) {
        fs::remove_file(&path)
            .await
            .map_err(|e| ActionError::fs("deleteFile", "unlink", &path, e))?;
    }
    Ok(())
}

async fn file_exists(cx: RunContext, params: Params) -> ActionResult {
    let filename = str_param("fileExists", &params, "filename")?;
    let path = in_current(&cx, "fileExists", filename)?;
    cx.display(&format!(": Checking if file exists {}", path.display()));
    let exists = fs::try_exists(&path).await.unwrap_or(false);
    cx.store().put(INPUT_KEY, Value::Bool(exists));
    Ok(())
}

async fn check_string_in_file(cx: RunContext, params: Params) -> ActionResult {
    let filename = str_param("checkStringInFile", &params, "filename")?;
    let needle = str_param("checkStringInFile", &params, "string")?;
    let path = text_file(&cx, "checkStringInFile", filename)?;
    cx.display(&format!(": Checking if string is in file {}", path.display()));

    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| ActionError::fs("checkStringInFile", "read", &path, e))?;
    cx.store().put(INPUT_KEY, Value::Bool(content.contains(needle)));
    Ok(())
}

/// Full URL of a download: relative URLs are appended to `host`
pub(crate) fn download_url(url: &str, host: Option<&str>) -> String {
    if url.starts_with("http") {
        url.to_string()
    } else {
        format!("{}{}", host.unwrap_or(""), url)
    }
}

/// Last path segment of a URL, without its query string
pub(crate) fn file_name_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

async fn download(cx: RunContext, params: Params) -> ActionResult {
    let url = str_param("download", &params, "url")?;
    let name = opt_str(&params, "filename").unwrap_or_else(|| file_name_from_url(url));
    let show_progress = opt_bool(&params, "showProgress").unwrap_or(true);
    let target_name = paths::sanitize(name);
    if target_name.is_empty() {
        return Err(ActionError::runtime("download", format!("Cannot derive a file name from {}", url)));
    }
    let path = in_current(&cx, "download", &target_name)?;
    let full_url = download_url(url, opt_str(&params, "host"));

    cx.display(&format!(": Downloading {}", name));
    let response = cx
        .http()
        .get(&full_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ActionError::network("download", &full_url, e))?;

    let total = response.content_length().filter(|len| *len > 0);
    let mut file = fs::File::create(&path)
        .await
        .map_err(|e| ActionError::fs("download", "open", &path, e))?;
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;
    let mut reported = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ActionError::network("download", &full_url, e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| ActionError::fs("download", "write", &path, e))?;
        received += chunk.len() as u64;

        if let (true, Some(total)) = (show_progress, total) {
            let percent = (received * 100 / total).min(100);
            let step = percent / 10 * 10;
            if step > reported {
                reported = step;
                cx.display(&format!(": {}% ({}/{} bytes)", step, received, total));
            }
        }
    }
    file.flush()
        .await
        .map_err(|e| ActionError::fs("download", "write", &path, e))?;

    tracing::info!(url = %full_url, bytes = received, path = %path.display(), "Download finished");
    Ok(())
}

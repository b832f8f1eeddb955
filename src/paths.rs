use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

lazy_static! {
    static ref UNSAFE_CHARS: Regex =
        Regex::new(r#"[^a-zA-Z0-9\-_.:?@(), +!#$%&*;|'"=<>^]"#).expect("sanitize pattern compiles");
}

/// Drop every character outside the allowed set, then trim.
pub fn sanitize(text: &str) -> String {
    UNSAFE_CHARS.replace_all(text, "").trim().to_string()
}

/// Resolve `.` and `..` without touching the filesystem
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

pub fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(normalize(path))
    } else {
        Ok(normalize(&std::env::current_dir()?.join(path)))
    }
}

/// Join `relative` onto `dir`; `None` when the result leaves `root`
pub fn confine(root: &Path, dir: &Path, relative: &str) -> Option<PathBuf> {
    let candidate = normalize(&dir.join(relative));
    if candidate.starts_with(root) {
        Some(candidate)
    } else {
        None
    }
}

/// One level up from `current`, never above `base`
pub fn parent_within(base: &Path, current: &Path) -> PathBuf {
    if current == base {
        return base.to_path_buf();
    }
    match current.parent() {
        Some(parent) if parent.starts_with(base) => parent.to_path_buf(),
        _ => base.to_path_buf(),
    }
}

/// Output directory of a recipe, always a direct child of `resources`.
/// `None` when nothing usable is left of `name` after sanitizing.
pub fn grab_dir(resources: &Path, name: &str) -> Option<PathBuf> {
    match sanitize(name).as_str() {
        "" | "." | ".." => None,
        dir => Some(resources.join(dir)),
    }
}

/// File extension with its leading dot, empty when there is none
pub fn extension(name: &str) -> String {
    let file = name.rsplit('/').next().unwrap_or(name);
    match file.rfind('.') {
        Some(0) | None => String::new(),
        Some(i) => file[i..].to_string(),
    }
}

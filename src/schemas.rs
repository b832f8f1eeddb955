//! Parameter shapes for the built-in actions and the recipe document.
//!
//! Every built-in action has a JSON Schema. At dispatch the interpolated params
//! are checked against it, defaults are filled in and undeclared keys are
//! dropped. At load time whole recipes are checked, including nested
//! `actions` bodies, with `{{…}}` values accepted for any field.

use jsonschema::JSONSchema;
use lazy_static::lazy_static;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::errors::ActionError;

pub const MAX_DURATION_MS: u64 = 300_000;

/// Params whose value must parse as an absolute URL
const URL_FIELDS: &[(&str, &str)] = &[("login", "url")];

/// Params holding nested action bodies
const NESTED_BODIES: &[&str] = &["actions", "elseActions"];

/* ===== Schema building blocks ===== */

fn non_empty() -> Value {
    json!({"type": "string", "minLength": 1})
}

fn string() -> Value {
    json!({"type": "string"})
}

fn boolean() -> Value {
    json!({"type": "boolean"})
}

fn number() -> Value {
    json!({"type": "number"})
}

fn integer() -> Value {
    json!({"type": "integer"})
}

fn any() -> Value {
    json!({})
}

fn duration() -> Value {
    json!({"type": "integer", "minimum": 0, "maximum": MAX_DURATION_MS})
}

fn image_type() -> Value {
    json!({"type": "string", "enum": ["jpeg", "png"]})
}

fn actions_array() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {"type": "string"},
                "params": {"type": "object"}
            }
        }
    })
}

fn object(required: &[(&str, Value)], optional: &[(&str, Value)]) -> Value {
    let mut properties = Map::new();
    for (name, schema) in required.iter().chain(optional.iter()) {
        properties.insert(name.to_string(), schema.clone());
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required.iter().map(|(name, _)| *name).collect::<Vec<_>>()
    })
}

fn empty() -> Value {
    object(&[], &[])
}

/* ===== Per-action schemas ===== */

fn action_schemas() -> Vec<(&'static str, Value)> {
    vec![
        // variables
        ("setVariable", object(&[("key", non_empty())], &[("value", any())])),
        ("getVariable", object(&[("key", non_empty())], &[("index", number())])),
        ("deleteVariable", object(&[("key", non_empty())], &[])),
        (
            "transferVariable",
            object(
                &[("from", non_empty()), ("to", non_empty())],
                &[("index", number()), ("key", string())],
            ),
        ),
        ("appendToVariable", object(&[("key", non_empty())], &[("value", any())])),
        ("countStart", object(&[("key", non_empty())], &[("value", number())])),
        ("countIncrement", object(&[("key", non_empty())], &[])),
        ("countDecrement", object(&[("key", non_empty())], &[])),
        // interaction
        (
            "click",
            object(
                &[("selector", non_empty())],
                &[("attribute", string()), ("text", string())],
            ),
        ),
        ("clickAll", object(&[("selector", non_empty())], &[])),
        (
            "scrollWaitClick",
            object(
                &[("selector", non_empty())],
                &[("ms", json!({"type": "integer", "minimum": 0}))],
            ),
        ),
        (
            "type",
            object(
                &[("selector", non_empty()), ("text", string())],
                &[("secret", boolean())],
            ),
        ),
        (
            "login",
            object(
                &[
                    ("url", non_empty()),
                    ("usernameSelector", non_empty()),
                    ("username", non_empty()),
                    ("passwordSelector", non_empty()),
                    ("password", non_empty()),
                    ("submitSelector", non_empty()),
                ],
                &[("cookieName", string())],
            ),
        ),
        // browser
        ("puppeteer", object(&[("func", non_empty())], &[("func2", string())])),
        (
            "screenshot",
            object(
                &[("name", non_empty())],
                &[("type", image_type()), ("fullPage", boolean())],
            ),
        ),
        (
            "screenshotElement",
            object(
                &[("name", non_empty()), ("selector", non_empty())],
                &[("type", image_type())],
            ),
        ),
        ("newPage", object(&[("pageKey", non_empty())], &[])),
        ("closePage", object(&[("pageKey", non_empty())], &[])),
        ("switchPage", object(&[("pageKey", non_empty())], &[])),
        (
            "getElements",
            object(&[("selector", non_empty())], &[("attribute", string())]),
        ),
        (
            "getChildren",
            object(
                &[("selectorParent", non_empty()), ("selectorChild", non_empty())],
                &[("attribute", string())],
            ),
        ),
        ("elementExists", object(&[("selector", non_empty())], &[])),
        // filesystem
        ("setBaseDir", object(&[("dir", non_empty())], &[])),
        (
            "setCurrentDir",
            object(&[("dir", non_empty())], &[("useBaseDir", boolean())]),
        ),
        ("resetCurrentDir", empty()),
        ("backToParentDir", empty()),
        (
            "createDir",
            object(&[("dir", non_empty())], &[("useBaseDir", boolean())]),
        ),
        ("deleteFolder", object(&[("foldername", non_empty())], &[])),
        ("listFolders", empty()),
        (
            "createFile",
            object(&[("filename", non_empty())], &[("content", string())]),
        ),
        (
            "readFromText",
            object(&[("filename", non_empty())], &[("breakLine", boolean())]),
        ),
        (
            "saveToText",
            object(&[("key", non_empty()), ("filename", non_empty())], &[]),
        ),
        (
            "appendToText",
            object(&[("key", non_empty()), ("filename", non_empty())], &[]),
        ),
        ("deleteFile", object(&[("filename", non_empty())], &[])),
        ("fileExists", object(&[("filename", non_empty())], &[])),
        (
            "checkStringInFile",
            object(&[("filename", non_empty()), ("string", non_empty())], &[]),
        ),
        (
            "download",
            object(
                &[("url", non_empty())],
                &[
                    ("filename", non_empty()),
                    ("host", string()),
                    ("showProgress", boolean()),
                ],
            ),
        ),
        // control flow
        (
            "if",
            object(&[("condition", non_empty()), ("actions", actions_array())], &[]),
        ),
        (
            "ifElse",
            object(
                &[
                    ("condition", non_empty()),
                    ("actions", actions_array()),
                    ("elseActions", actions_array()),
                ],
                &[],
            ),
        ),
        (
            "for",
            object(
                &[
                    ("from", integer()),
                    ("until", integer()),
                    ("actions", actions_array()),
                ],
                &[("step", json!({"type": "integer", "default": 1}))],
            ),
        ),
        (
            "forEach",
            object(&[("key", non_empty()), ("actions", actions_array())], &[]),
        ),
        (
            "while",
            object(&[("condition", non_empty()), ("actions", actions_array())], &[]),
        ),
        // utilities
        ("sanitizeString", object(&[("string", string())], &[])),
        (
            "replaceString",
            object(
                &[("string", string()), ("search", string()), ("replace", string())],
                &[],
            ),
        ),
        (
            "matchFromString",
            object(&[("string", string()), ("regex", string())], &[]),
        ),
        (
            "matchFromSelector",
            object(
                &[("selector", non_empty()), ("regex", string())],
                &[("attribute", string())],
            ),
        ),
        ("sleep", object(&[("ms", duration())], &[])),
        (
            "log",
            object(
                &[("message", string())],
                &[("color", string()), ("background", string())],
            ),
        ),
        ("random", object(&[("min", number()), ("max", number())], &[])),
        ("uuid", empty()),
        ("getExtension", object(&[("string", non_empty())], &[])),
        ("userInput", object(&[("query", string())], &[])),
    ]
}

fn grab_schema() -> Value {
    json!({
        "type": "object",
        "required": ["name", "actions"],
        "properties": {
            "name": {"type": "string", "minLength": 1, "pattern": "^[a-zA-Z0-9_-]+$"},
            "description": {"type": "string"},
            "actions": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": {"type": "string", "minLength": 1},
                        "params": {"type": "object"},
                        "await": {"type": "boolean"}
                    }
                }
            }
        }
    })
}

struct ActionSchema {
    schema: Value,
    compiled: JSONSchema,
    /// Keep undeclared params instead of dropping them
    passthrough: bool,
}

impl ActionSchema {
    fn compile(name: &str, schema: Value) -> Self {
        let compiled = JSONSchema::compile(&schema)
            .unwrap_or_else(|e| panic!("schema for {} does not compile: {}", name, e));
        Self {
            passthrough: name == "puppeteer",
            schema,
            compiled,
        }
    }

    fn properties(&self) -> Option<&Map<String, Value>> {
        self.schema.get("properties").and_then(Value::as_object)
    }
}

lazy_static! {
    static ref ACTION_SCHEMAS: HashMap<&'static str, ActionSchema> = action_schemas()
        .into_iter()
        .map(|(name, schema)| (name, ActionSchema::compile(name, schema)))
        .collect();
    static ref GRAB_SCHEMA: JSONSchema =
        JSONSchema::compile(&grab_schema()).expect("recipe schema compiles");
}

/* ===== Issues ===== */

/// One violated rule, located by a dotted path.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  - {}: {}", self.path, self.message)
    }
}

pub fn format_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_path(prefix: &str, suffix: &str) -> String {
    match (prefix.is_empty(), suffix.is_empty()) {
        (true, _) => suffix.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{}.{}", prefix, suffix),
    }
}

/// `/actions/0/name` -> `actions.0.name`
fn pointer_to_path(pointer: &str) -> String {
    pointer
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

fn schema_issues(schema: &JSONSchema, instance: &Value, prefix: &str) -> Vec<Issue> {
    match schema.validate(instance) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| Issue {
                path: join_path(prefix, &pointer_to_path(&e.instance_path.to_string())),
                message: e.to_string(),
            })
            .collect(),
    }
}

fn is_template(value: &Value) -> bool {
    value.as_str().map(|s| s.contains("{{")).unwrap_or(false)
}

fn url_issues(action: &str, params: &Map<String, Value>, skip: &HashSet<&str>) -> Vec<Issue> {
    URL_FIELDS
        .iter()
        .filter(|(name, _)| *name == action)
        .filter(|(_, field)| !skip.contains(field))
        .filter_map(|(_, field)| {
            let raw = params.get(*field)?.as_str()?;
            match url::Url::parse(raw) {
                Ok(_) => None,
                Err(_) => Some(Issue {
                    path: field.to_string(),
                    message: "Invalid URL format".to_string(),
                }),
            }
        })
        .collect()
}

/* ===== Public API ===== */

pub fn has_schema(action: &str) -> bool {
    ACTION_SCHEMAS.contains_key(action)
}

pub fn action_names() -> Vec<&'static str> {
    let mut names: Vec<_> = ACTION_SCHEMAS.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Check `params` for `action`, returning them with defaults filled in.
/// Actions without a schema (extensions) get their params back untouched.
pub fn validate_params(
    action: &str,
    mut params: Map<String, Value>,
) -> Result<Map<String, Value>, ActionError> {
    let Some(schema) = ACTION_SCHEMAS.get(action) else {
        return Ok(params);
    };

    let instance = Value::Object(params);
    let mut issues = schema_issues(&schema.compiled, &instance, "");
    params = match instance {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    issues.extend(url_issues(action, &params, &HashSet::new()));

    if !issues.is_empty() {
        for issue in issues.iter_mut().filter(|i| i.path.is_empty()) {
            issue.path = "params".to_string();
        }
        return Err(ActionError::Validation {
            action: action.to_string(),
            details: format_issues(&issues),
        });
    }

    if let Some(properties) = schema.properties() {
        for (name, property) in properties {
            if let Some(default) = property.get("default") {
                params.entry(name.clone()).or_insert_with(|| default.clone());
            }
        }
        if !schema.passthrough {
            params.retain(|name, _| properties.contains_key(name));
        }
    }
    Ok(params)
}

/// Check a whole recipe document. `is_registered` decides which action names
/// exist; built-ins without a schema and extensions are only name-checked.
pub fn check_grab(document: &Value, is_registered: &dyn Fn(&str) -> bool) -> Vec<Issue> {
    let mut issues = schema_issues(&GRAB_SCHEMA, document, "");
    for issue in issues.iter_mut().filter(|i| i.path.is_empty()) {
        issue.path = "root".to_string();
    }
    if !issues.is_empty() {
        return issues;
    }

    if let Some(actions) = document.get("actions").and_then(Value::as_array) {
        check_body(actions, "actions", is_registered, &mut issues);
    }
    issues
}

fn check_body(
    actions: &[Value],
    prefix: &str,
    is_registered: &dyn Fn(&str) -> bool,
    issues: &mut Vec<Issue>,
) {
    for (i, action) in actions.iter().enumerate() {
        check_action(action, &format!("{}.{}", prefix, i), is_registered, issues);
    }
}

fn check_action(
    action: &Value,
    path: &str,
    is_registered: &dyn Fn(&str) -> bool,
    issues: &mut Vec<Issue>,
) {
    let Some(name) = action.get("name").and_then(Value::as_str) else {
        issues.push(Issue {
            path: join_path(path, "name"),
            message: "Action name is required".to_string(),
        });
        return;
    };
    if !is_registered(name) {
        issues.push(Issue {
            path: join_path(path, "name"),
            message: format!("Unknown action: \"{}\"", name),
        });
        return;
    }

    let Some(params) = action.get("params").and_then(Value::as_object) else {
        return;
    };
    let params_path = join_path(path, "params");

    if let Some(schema) = ACTION_SCHEMAS.get(name) {
        // Templated values are only known at dispatch
        let templated: HashSet<&str> = params
            .iter()
            .filter(|(_, v)| is_template(v))
            .map(|(k, _)| k.as_str())
            .collect();
        let instance = Value::Object(params.clone());

        issues.extend(
            schema_issues(&schema.compiled, &instance, "")
                .into_iter()
                .filter(|issue| {
                    let field = issue.path.split('.').next().unwrap_or("");
                    !templated.contains(field)
                })
                .map(|issue| Issue {
                    path: join_path(&params_path, &issue.path),
                    message: format!("Action \"{}\" - {}", name, issue.message),
                }),
        );
        issues.extend(url_issues(name, params, &templated).into_iter().map(|issue| Issue {
            path: join_path(&params_path, &issue.path),
            message: format!("Action \"{}\" - {}", name, issue.message),
        }));
    }

    for body in NESTED_BODIES {
        if let Some(nested) = params.get(*body).and_then(Value::as_array) {
            check_body(nested, &join_path(&params_path, body), is_registered, issues);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn all_known(_: &str) -> bool {
        true
    }

    fn known(name: &str) -> bool {
        has_schema(name)
    }

    #[test]
    fn test_every_schema_compiles() {
        assert_eq!(action_names().len(), 52);
        assert!(has_schema("forEach"));
        assert!(!has_schema("frobnicate"));
    }

    #[test]
    fn test_fills_defaults_and_drops_unknown_keys() {
        let out = validate_params(
            "for",
            params(json!({"from": 1, "until": 3, "actions": [], "extra": true})),
        )
        .unwrap();
        assert_eq!(out["step"], json!(1));
        assert!(!out.contains_key("extra"));
    }

    #[test]
    fn test_puppeteer_keeps_positional_params() {
        let out = validate_params(
            "puppeteer",
            params(json!({"func": "goto", "url": "https://example.com"})),
        )
        .unwrap();
        assert_eq!(out["url"], json!("https://example.com"));
    }

    #[test]
    fn test_reports_each_violation() {
        let err = validate_params("sleep", params(json!({"ms": 400000}))).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("[sleep] Validation failed:"));
        assert!(message.contains("  - ms:"));

        let err = validate_params("click", params(json!({}))).unwrap_err();
        assert!(err.to_string().contains("  - params:"));
        assert!(err.to_string().contains("selector"));

        let err = validate_params("screenshot", params(json!({"name": "a", "type": "gif"}))).unwrap_err();
        assert!(err.to_string().contains("  - type:"));
    }

    #[test]
    fn test_login_requires_absolute_url() {
        let valid = json!({
            "url": "https://example.com/login",
            "usernameSelector": "#u",
            "username": "me",
            "passwordSelector": "#p",
            "password": "pw",
            "submitSelector": "#go"
        });
        assert!(validate_params("login", params(valid.clone())).is_ok());

        let mut invalid = valid;
        invalid["url"] = json!("not a url");
        let err = validate_params("login", params(invalid)).unwrap_err();
        assert!(err.to_string().contains("  - url: Invalid URL format"));
    }

    #[test]
    fn test_extension_actions_pass_through() {
        let input = params(json!({"anything": [1, 2]}));
        assert_eq!(validate_params("myExtension", input.clone()).unwrap(), input);
    }

    #[test]
    fn test_check_grab_accepts_valid_recipe() {
        let grab = json!({
            "name": "demo_1",
            "actions": [
                {"name": "setVariable", "params": {"key": "N", "value": 1}},
                {"name": "for", "params": {"from": 1, "until": "{{N}}", "actions": [
                    {"name": "log", "params": {"message": "{{INPUT}}"}}
                ]}}
            ]
        });
        assert!(check_grab(&grab, &known).is_empty());
    }

    #[test]
    fn test_check_grab_reports_paths() {
        let grab = json!({
            "name": "bad name",
            "actions": []
        });
        let issues = check_grab(&grab, &all_known);
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"name"));
        assert!(paths.contains(&"actions"));

        let grab = json!({
            "name": "demo",
            "actions": [
                {"name": "sleep", "params": {"ms": -1}},
                {"name": "frobnicate"},
                {"name": "if", "params": {"condition": "true", "actions": [
                    {"name": "nope"}
                ]}}
            ]
        });
        let issues = check_grab(&grab, &known);
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].path, "actions.0.params.ms");
        assert!(issues[0].message.starts_with("Action \"sleep\" - "));
        assert_eq!(issues[1].to_string(), "  - actions.1.name: Unknown action: \"frobnicate\"");
        assert_eq!(issues[2].path, "actions.2.params.actions.0.name");
    }

    #[test]
    fn test_missing_required_fields_at_root() {
        let issues = check_grab(&json!({"description": "x"}), &all_known);
        assert!(!issues.is_empty());
        assert!(issues.iter().all(|i| i.path == "root"));
        assert!(issues.iter().any(|i| i.message.contains("\"name\"")));
    }
}

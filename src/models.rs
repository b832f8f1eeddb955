use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---- Grab recipe ----
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grab {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub actions: Vec<GrabAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrabAction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    /// `false` defers completion to the end of the run
    #[serde(rename = "await", default = "default_await")]
    pub await_: bool,
}

fn default_await() -> bool {
    true
}

impl GrabAction {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params: params.as_object().cloned(),
            await_: true,
        }
    }

    /// Params to dispatch with; absent params become an empty mapping
    pub fn params_or_empty(&self) -> Map<String, Value> {
        self.params.clone().unwrap_or_default()
    }
}

impl Grab {
    pub fn description_or_default(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or("No description provided")
    }
}

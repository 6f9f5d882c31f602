use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathValue {
    pub path: String,
    pub value: Value,
}

impl PathValue {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self { path: path.into(), value }
    }
}

/// A batch of path updates, tagged with the identifier of whoever emitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(rename = "$source")]
    pub origin: String,
    pub values: Vec<PathValue>,
}

impl Delta {
    pub fn new(origin: impl Into<String>, values: Vec<PathValue>) -> Self {
        Self { origin: origin.into(), values }
    }

    pub fn single(origin: impl Into<String>, path: impl Into<String>, value: Value) -> Self {
        Self::new(origin, vec![PathValue::new(path, value)])
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value_of(&self, path: &str) -> Option<&Value> {
        self.values.iter().find(|pv| pv.path == path).map(|pv| &pv.value)
    }
}

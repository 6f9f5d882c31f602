use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::delta::PathValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmState {
    Nominal,
    Normal,
    Alert,
    Warn,
    Alarm,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmMethod {
    Visual,
    Sound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub state: AlarmState,
    pub method: Vec<AlarmMethod>,
    pub message: String,
}

impl Notification {
    /// Sound + visual alarm, the default for anything the helper raises.
    pub fn alarm(message: impl Into<String>) -> Self {
        Self {
            state: AlarmState::Alarm,
            method: vec![AlarmMethod::Sound, AlarmMethod::Visual],
            message: message.into(),
        }
    }

    pub fn normal(message: impl Into<String>) -> Self {
        Self { state: AlarmState::Normal, method: Vec::new(), message: message.into() }
    }

    pub fn with_state(mut self, state: AlarmState) -> Self {
        self.state = state;
        self
    }

    pub fn with_method(mut self, method: Vec<AlarmMethod>) -> Self {
        self.method = method;
        self
    }

    /// `path` is either a full `notifications.*` path or a suffix below it.
    pub fn to_path_value(&self, path: &str) -> PathValue {
        let full = if path.starts_with(crate::paths::NOTIFICATIONS_PREFIX) {
            path.to_string()
        } else {
            format!("{}{}", crate::paths::NOTIFICATIONS_PREFIX, path)
        };
        PathValue::new(full, serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

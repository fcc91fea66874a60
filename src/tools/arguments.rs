//! Typed access to tool call arguments.

use crate::error::CadenceError;

/// Parsed tool call arguments with typed getters.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn get_str(&self, key: &str) -> Result<&str, CadenceError> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing("string", key))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, CadenceError> {
        self.value
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| missing("integer", key))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, CadenceError> {
        self.value
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| missing("number", key))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, CadenceError> {
        self.value
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| missing("boolean", key))
    }

    /// Deserialize the whole argument object.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, CadenceError> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| CadenceError::InvalidArgument(format!("arguments do not match: {e}")))
    }
}

fn missing(kind: &str, key: &str) -> CadenceError {
    CadenceError::InvalidArgument(format!("missing {kind} argument '{key}'"))
}

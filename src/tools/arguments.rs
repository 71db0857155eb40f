//! Typed access to tool call arguments.

use crate::error::MarketMindError;

/// Wrapper around tool call arguments providing typed extraction.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, MarketMindError> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                MarketMindError::InvalidArgument(format!("Missing string argument: {key}"))
            })
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Get an optional integer argument.
    pub fn get_u64_opt(&self, key: &str) -> Option<u64> {
        self.value.get(key).and_then(|v| v.as_u64())
    }

    /// Collect every string found in an array argument; absent keys yield an empty list.
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        self.value
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deserialize the entire arguments into a typed struct.
    ///
    /// String payloads are parsed as JSON first, since some gateways hand
    /// arguments over as an encoded blob.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, MarketMindError> {
        let value = match &self.value {
            serde_json::Value::String(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str::<serde_json::Value>(trimmed).map_err(|e| {
                        MarketMindError::InvalidArgument(format!(
                            "Failed to deserialize arguments: {e}"
                        ))
                    })?
                }
            }
            serde_json::Value::Null => serde_json::json!({}),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| {
            MarketMindError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

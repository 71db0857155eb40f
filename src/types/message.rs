//! Conversation message types shared by the session store, the context
//! window manager and the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A message in a conversation.
///
/// Session history stores `user`, `assistant` and synthetic `system` summary
/// messages. `tool` messages and assistant tool-call messages only live in the
/// transient sequence a single query sends to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_used: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Tool calls requested by the model (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Call this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tools_used: None,
            metadata: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut message = Self::new(Role::Assistant, text);
        message.tool_calls = calls;
        message
    }

    /// Create a tool result message. Failed calls carry an `{ "error": .. }` payload.
    pub fn tool_result(tool_call_id: impl Into<String>, payload: &serde_json::Value) -> Self {
        let mut message = Self::new(Role::Tool, payload.to_string());
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn with_tools_used(mut self, tools: Vec<String>) -> Self {
        self.tools_used = Some(tools);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether this is a synthetic summary produced by context compaction.
    pub fn is_context_summary(&self) -> bool {
        self.role == Role::System
            && self
                .metadata
                .as_ref()
                .and_then(|m| m.get("type"))
                .and_then(serde_json::Value::as_str)
                == Some(CONTEXT_SUMMARY_TYPE)
    }
}

/// Metadata `type` tag carried by compaction summary messages.
pub const CONTEXT_SUMMARY_TYPE: &str = "context_summary";

/// Conversation role.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_carries_call_id_and_payload() {
        let msg = Message::tool_result("call_1", &serde_json::json!({"price": 101.5}));
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(msg.content.contains("101.5"));
    }

    #[test]
    fn optional_fields_are_omitted_when_serialized() {
        let msg = Message::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("toolsUsed").is_none());
        assert!(json.get("toolCalls").is_none());
    }

    #[test]
    fn summary_detection_requires_system_role_and_tag() {
        let tagged = serde_json::json!({ "type": CONTEXT_SUMMARY_TYPE });
        assert!(Message::system("s").with_metadata(tagged.clone()).is_context_summary());
        assert!(!Message::user("s").with_metadata(tagged).is_context_summary());
        assert!(!Message::system("plain").is_context_summary());
    }

    #[test]
    fn role_parses_from_lowercase() {
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!(Role::Tool.to_string(), "tool");
    }
}

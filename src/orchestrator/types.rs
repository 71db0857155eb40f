//! Query request/response types and session introspection views.

use std::time::Duration;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::TokenCount;
use crate::session::UserPreferences;
use crate::types::{GenerationSettings, Usage};

/// Per-query overrides; unset fields fall back to the orchestrator config.
#[derive(Debug, Clone, Default, Builder, PartialEq)]
pub struct QueryOptions {
    pub max_iterations: Option<usize>,
    pub use_memory: Option<bool>,
    pub include_context: Option<bool>,
    pub timeout: Option<Duration>,
    pub generation: Option<GenerationSettings>,
}

/// One question to answer.
#[derive(Debug, Clone, Builder, PartialEq)]
pub struct QueryRequest {
    #[builder(into)]
    pub query: String,
    /// Generated when absent.
    #[builder(into)]
    pub session_id: Option<String>,
    #[builder(into)]
    pub user_id: Option<String>,
    #[builder(default)]
    pub options: QueryOptions,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
            user_id: None,
            options: QueryOptions::default(),
        }
    }
}

/// What happened in one tool-calling iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    /// 1-based.
    pub iteration_index: usize,
    pub tools_called: Vec<String>,
    pub inferred_purpose: String,
    pub tool_arguments: Vec<serde_json::Value>,
    /// Tools whose call returned an error payload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_id: String,
    pub message_count: usize,
    pub was_summarized: bool,
    pub context_tokens: usize,
    pub summarization_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub response: String,
    /// Distinct tool names in first-call order.
    pub tools_used: Vec<String>,
    /// Gateway calls made: decisions plus the forced synthesis, if any.
    pub iterations_used: usize,
    pub iteration_details: Vec<IterationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_metadata: Option<SessionMetadata>,
    #[serde(default)]
    pub usage: Usage,
}

/// Read-only session summary for outer layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub preferences: UserPreferences,
    pub recent_queries: Vec<String>,
    pub top_entities: Vec<(String, u64)>,
    pub top_tools: Vec<(String, u64)>,
}

/// Context window usage for one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    pub message_count: usize,
    pub token_count: TokenCount,
    pub max_tokens: usize,
    pub usage_percent: f64,
    pub needs_summarization: bool,
    pub summarization_count: usize,
    pub last_summarization: Option<DateTime<Utc>>,
}

//! Session state: history, preferences, usage statistics and the audit trail.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::types::{Message, Role};

/// Summarization audit records kept per session.
pub const MAX_SUMMARIZATION_RECORDS: usize = 10;
/// Preferred entities retained after merging.
pub const MAX_PREFERRED_ENTITIES: usize = 20;

/// Durable per-conversation state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub conversation_history: Vec<Message>,
    #[serde(default)]
    pub preferences: UserPreferences,
    #[serde(default)]
    pub stats: ContextData,
    /// Bumped on every mutation. Used to discard stale snapshots and compactions.
    #[serde(default)]
    pub revision: u64,
}

impl Session {
    pub fn new(session_id: impl Into<String>, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id,
            start_time: now,
            last_activity: now,
            conversation_history: Vec::new(),
            preferences: UserPreferences::default(),
            stats: ContextData::default(),
            revision: 0,
        }
    }

    /// Mark a mutation.
    pub(crate) fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_activity {
            self.last_activity = now;
        }
        self.revision += 1;
    }

    /// Append a message, keeping timestamps non-decreasing and the history bounded.
    pub(crate) fn append_message(
        &mut self,
        mut message: Message,
        max_history: usize,
        max_recent_queries: usize,
    ) {
        if let Some(last) = self.conversation_history.last() {
            if message.timestamp < last.timestamp {
                message.timestamp = last.timestamp;
            }
        }
        if message.role == Role::User {
            self.stats.push_query(&message.content, max_recent_queries);
        }
        if let Some(tools) = &message.tools_used {
            self.stats.record_tool_use(tools);
        }
        self.conversation_history.push(message);
        self.trim_history(max_history);
    }

    pub(crate) fn trim_history(&mut self, max_history: usize) {
        let len = self.conversation_history.len();
        if len > max_history {
            self.conversation_history.drain(..len - max_history);
        }
    }

    pub fn message_count(&self) -> usize {
        self.conversation_history.len()
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now - self.last_activity > timeout
    }
}

/// Preferred level of detail for answers.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AnalysisStyle {
    Brief,
    #[default]
    Detailed,
    Technical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPreferences {
    pub price_alerts: bool,
    pub news_digest: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            price_alerts: false,
            news_digest: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    pub preferred_entities: Vec<String>,
    pub preferred_categories: Vec<String>,
    pub analysis_style: AnalysisStyle,
    pub locale: String,
    pub notifications: NotificationPreferences,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            preferred_entities: Vec::new(),
            preferred_categories: Vec::new(),
            analysis_style: AnalysisStyle::default(),
            locale: "en-US".to_string(),
            notifications: NotificationPreferences::default(),
        }
    }
}

impl UserPreferences {
    /// Merge a partial update. Scalars are replaced; lists are unioned in order.
    pub fn merge(&mut self, update: &PreferencesUpdate) {
        if let Some(entities) = &update.preferred_entities {
            union_into(&mut self.preferred_entities, entities);
            let len = self.preferred_entities.len();
            if len > MAX_PREFERRED_ENTITIES {
                self.preferred_entities.drain(..len - MAX_PREFERRED_ENTITIES);
            }
        }
        if let Some(categories) = &update.preferred_categories {
            union_into(&mut self.preferred_categories, categories);
        }
        if let Some(style) = update.analysis_style {
            self.analysis_style = style;
        }
        if let Some(locale) = &update.locale {
            self.locale = locale.clone();
        }
        if let Some(flag) = update.price_alerts {
            self.notifications.price_alerts = flag;
        }
        if let Some(flag) = update.news_digest {
            self.notifications.news_digest = flag;
        }
    }
}

fn union_into(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.iter().any(|existing| existing == item) {
            target.push(item.clone());
        }
    }
}

/// Partial preferences; `None` leaves the current value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferencesUpdate {
    pub preferred_entities: Option<Vec<String>>,
    pub preferred_categories: Option<Vec<String>>,
    pub analysis_style: Option<AnalysisStyle>,
    pub locale: Option<String>,
    pub price_alerts: Option<bool>,
    pub news_digest: Option<bool>,
}

impl PreferencesUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Derived usage statistics for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextData {
    pub recent_queries: VecDeque<String>,
    pub tool_use_count: BTreeMap<String, u64>,
    pub entity_access_count: BTreeMap<String, u64>,
    pub summarization_history: Vec<SummarizationRecord>,
    pub last_summarization: Option<DateTime<Utc>>,
}

impl ContextData {
    pub(crate) fn push_query(&mut self, query: &str, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.recent_queries.len() >= capacity {
            self.recent_queries.pop_front();
        }
        self.recent_queries.push_back(query.to_string());
    }

    pub(crate) fn record_tool_use(&mut self, tools: &[String]) {
        for tool in tools {
            *self.tool_use_count.entry(tool.clone()).or_insert(0) += 1;
        }
    }

    pub(crate) fn record_entity(&mut self, entity: &str) {
        *self
            .entity_access_count
            .entry(entity.to_string())
            .or_insert(0) += 1;
    }

    pub(crate) fn record_summarization(&mut self, record: SummarizationRecord) {
        self.last_summarization = Some(record.timestamp);
        self.summarization_history.push(record);
        let len = self.summarization_history.len();
        if len > MAX_SUMMARIZATION_RECORDS {
            self.summarization_history
                .drain(..len - MAX_SUMMARIZATION_RECORDS);
        }
    }

    /// Most accessed entities, highest count first.
    pub fn top_entities(&self, n: usize) -> Vec<(String, u64)> {
        top_n(&self.entity_access_count, n)
    }

    /// Most used tools, highest count first.
    pub fn top_tools(&self, n: usize) -> Vec<(String, u64)> {
        top_n(&self.tool_use_count, n)
    }
}

fn top_n(counts: &BTreeMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut ranked: Vec<(String, u64)> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    // BTreeMap order breaks ties alphabetically; sort_by is stable.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(n);
    ranked
}

/// Compacted representation of an archived history prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    pub summary_text: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub important_entities: Vec<String>,
    #[serde(default)]
    pub inferred_preferences: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub original_message_count: usize,
}

/// One compaction event in a session's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummarizationRecord {
    pub timestamp: DateTime<Utc>,
    pub messages_before: usize,
    pub messages_after: usize,
    pub tokens_saved: usize,
    pub trigger_reason: String,
    #[serde(default)]
    pub archived_original_messages: Vec<Message>,
}

/// Portable form of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub session: Session,
}

impl SessionExport {
    pub const VERSION: u32 = 1;
}

/// The durable blob: every session keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub sessions: HashMap<String, Session>,
    #[serde(default)]
    pub last_saved_at: Option<DateTime<Utc>>,
}

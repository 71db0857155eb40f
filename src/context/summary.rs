//! Summary generation helpers: the extraction prompt, defensive reply parsing,
//! the extractive fallback and the synthetic summary message.

use std::collections::HashMap;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::tokens::{truncate_to_tokens, MESSAGE_OVERHEAD_TOKENS};
use crate::error::MarketMindError;
use crate::session::preferences::extract_entities;
use crate::session::ContextSummary;
use crate::types::{Message, Role, CONTEXT_SUMMARY_TYPE};

pub const SUMMARY_SYSTEM_PROMPT: &str = "You compress market-analysis conversations. \
Read the transcript and reply with a single JSON object and nothing else:\n\
{\"summary\": string, \"keyPoints\": [string], \"importantEntities\": [string], \
\"inferredPreferences\": [string]}\n\
Keep tickers, figures and dates that later questions may rely on. \
Record what the user prefers (detail level, sectors, instruments) under inferredPreferences.";

const FALLBACK_USER_TURNS: usize = 3;
const FALLBACK_ENTITIES: usize = 5;
const FALLBACK_TURN_CHARS: usize = 200;

/// Flatten messages into a role-tagged transcript.
pub fn serialize_messages_for_summary(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            Role::Tool => lines.push(format!(
                "[tool] id={} result={}",
                message.tool_call_id.as_deref().unwrap_or("?"),
                message.content
            )),
            role => {
                if !message.content.is_empty() {
                    lines.push(format!("[{role}] {}", message.content));
                }
                for call in &message.tool_calls {
                    lines.push(format!("[{role}.tool_call] {} {}", call.name, call.arguments));
                }
            }
        }
    }
    lines.join("\n")
}

/// Messages for the tool-free summarization call.
pub fn summary_request_messages(transcript: &str, max_summary_tokens: usize) -> Vec<Message> {
    vec![
        Message::system(SUMMARY_SYSTEM_PROMPT),
        Message::user(format!(
            "Summarize this conversation in at most {max_summary_tokens} tokens.\n\n<transcript>\n{transcript}\n</transcript>"
        )),
    ]
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SummaryReply {
    #[serde(alias = "summaryText", alias = "summary_text")]
    summary: Value,
    #[serde(alias = "keyPoints")]
    key_points: Value,
    #[serde(alias = "importantEntities", alias = "entities")]
    important_entities: Value,
    #[serde(alias = "inferredPreferences", alias = "preferences")]
    inferred_preferences: Value,
}

/// Parse a model reply, tolerating code fences and surrounding prose.
pub fn parse_summary_reply(
    reply: &str,
    original_message_count: usize,
) -> Result<ContextSummary, MarketMindError> {
    let body = strip_code_fence(reply.trim());
    let json_slice = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(MarketMindError::SummarizationFallback(
                "reply contains no JSON object".to_string(),
            ))
        }
    };
    let parsed: SummaryReply = serde_json::from_str(json_slice)
        .map_err(|err| MarketMindError::SummarizationFallback(format!("invalid JSON: {err}")))?;

    let summary_text = match &parsed.summary {
        Value::String(text) => text.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if summary_text.is_empty() {
        return Err(MarketMindError::SummarizationFallback(
            "reply has no summary text".to_string(),
        ));
    }

    Ok(ContextSummary {
        summary_text,
        key_points: string_list(&parsed.key_points),
        important_entities: string_list(&parsed.important_entities),
        inferred_preferences: string_list(&parsed.inferred_preferences),
        timestamp: Utc::now(),
        original_message_count,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence.
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::String(_) | Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{key}: {s}"),
                other => format!("{key}: {other}"),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Deterministic summary from the archived messages: most frequent entities
/// plus the first few user turns.
pub fn extractive_summary(messages: &[Message]) -> ContextSummary {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut order = 0usize;
    for message in messages.iter().filter(|m| m.role != Role::Tool) {
        for entity in extract_entities(&message.content) {
            let entry = counts.entry(entity).or_insert((0, order));
            entry.0 += 1;
            order += 1;
        }
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    let entities: Vec<String> = ranked
        .into_iter()
        .take(FALLBACK_ENTITIES)
        .map(|(entity, _)| entity)
        .collect();

    let user_turns: Vec<&Message> = messages.iter().filter(|m| m.role == Role::User).collect();
    let key_points: Vec<String> = user_turns
        .iter()
        .take(FALLBACK_USER_TURNS)
        .map(|m| {
            let text: String = m.content.chars().take(FALLBACK_TURN_CHARS).collect();
            format!("User asked: {text}")
        })
        .collect();

    let mut summary_text = format!(
        "Earlier conversation of {} messages with {} user questions.",
        messages.len(),
        user_turns.len()
    );
    if !entities.is_empty() {
        summary_text.push_str(&format!(" Frequently discussed: {}.", entities.join(", ")));
    }

    ContextSummary {
        summary_text,
        key_points,
        important_entities: entities,
        inferred_preferences: Vec::new(),
        timestamp: Utc::now(),
        original_message_count: messages.len(),
    }
}

/// Plain-text rendering used as the summary message content.
pub fn render_summary(summary: &ContextSummary) -> String {
    let mut out = format!(
        "[Summary of {} earlier messages]\n{}",
        summary.original_message_count, summary.summary_text
    );
    if !summary.key_points.is_empty() {
        out.push_str("\nKey points:");
        for point in &summary.key_points {
            out.push_str("\n- ");
            out.push_str(point);
        }
    }
    if !summary.important_entities.is_empty() {
        out.push_str("\nEntities: ");
        out.push_str(&summary.important_entities.join(", "));
    }
    if !summary.inferred_preferences.is_empty() {
        out.push_str("\nPreferences: ");
        out.push_str(&summary.inferred_preferences.join("; "));
    }
    out
}

/// The synthetic `system` message that replaces a compacted prefix.
/// Its estimated size never exceeds `max_tokens`.
pub fn summary_message(summary: &ContextSummary, max_tokens: usize) -> Message {
    let content = truncate_to_tokens(
        &render_summary(summary),
        max_tokens.saturating_sub(MESSAGE_OVERHEAD_TOKENS),
    );
    Message::system(content).with_metadata(json!({
        "type": CONTEXT_SUMMARY_TYPE,
        "original_message_count": summary.original_message_count,
        "summary": summary,
    }))
}

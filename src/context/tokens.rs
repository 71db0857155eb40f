//! Approximate token estimation.
//!
//! Four characters per token, rounded up, plus a fixed per-message overhead.
//! Deterministic and monotonic; not tokenizer-exact.

use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Framing cost charged once per message.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

pub fn estimate_text_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut tokens = MESSAGE_OVERHEAD_TOKENS + estimate_text_tokens(&message.content);
    for call in &message.tool_calls {
        let args = serde_json::to_string(&call.arguments).unwrap_or_default();
        tokens += estimate_text_tokens(&call.name) + estimate_text_tokens(&args) + 8;
    }
    if let Some(id) = &message.tool_call_id {
        tokens += estimate_text_tokens(id);
    }
    tokens
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Estimated size of a request: system prompt plus history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCount {
    pub system: usize,
    pub messages: usize,
    pub total: usize,
}

impl TokenCount {
    pub fn of(messages: &[Message], system_prompt: &str) -> Self {
        let system = if system_prompt.is_empty() {
            0
        } else {
            MESSAGE_OVERHEAD_TOKENS + estimate_text_tokens(system_prompt)
        };
        let messages = estimate_messages_tokens(messages);
        Self {
            system,
            messages,
            total: system + messages,
        }
    }
}

/// Share of a context window in use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUsage {
    pub used_tokens: usize,
    pub context_window: usize,
    pub remaining_tokens: usize,
    pub usage_percent: f64,
}

impl ContextUsage {
    pub fn new(used_tokens: usize, context_window: usize) -> Self {
        let usage_percent = if context_window == 0 {
            100.0
        } else {
            used_tokens as f64 * 100.0 / context_window as f64
        };
        Self {
            used_tokens,
            context_window,
            remaining_tokens: context_window.saturating_sub(used_tokens),
            usage_percent,
        }
    }
}

/// Truncate `text` so it fits in `max_tokens`, marking the cut.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_text_tokens(text) <= max_tokens {
        return text.to_string();
    }
    const MARKER: &str = " [truncated]";
    let budget_chars = (max_tokens * 4).saturating_sub(MARKER.len());
    let mut out: String = text.chars().take(budget_chars).collect();
    if max_tokens * 4 >= MARKER.len() {
        out.push_str(MARKER);
    }
    out
}

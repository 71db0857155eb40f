//! Context window manager: detects when history outgrows its token budget and
//! replaces the oldest part with a generated summary.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::summary::{
    extractive_summary, parse_summary_reply, serialize_messages_for_summary, summary_message,
    summary_request_messages,
};
use super::tokens::{
    estimate_messages_tokens, truncate_to_tokens, TokenCount, MESSAGE_OVERHEAD_TOKENS,
};
use crate::config::{ContextWindowConfig, ContextWindowConfigUpdate};
use crate::error::MarketMindError;
use crate::gateway::{CompletionRequest, LanguageModelGateway};
use crate::session::{ContextSummary, SummarizationRecord};
use crate::types::{GenerationSettings, Message, Role};

/// History view ready to send, plus what compaction (if any) produced.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimalContext {
    pub messages: Vec<Message>,
    pub summary: Option<ContextSummary>,
    pub was_summarized: bool,
    pub token_count: TokenCount,
    /// Audit entry for the compaction; `Some` exactly when `was_summarized`.
    pub record: Option<SummarizationRecord>,
}

impl OptimalContext {
    fn unchanged(messages: &[Message], token_count: TokenCount) -> Self {
        Self {
            messages: messages.to_vec(),
            summary: None,
            was_summarized: false,
            token_count,
            record: None,
        }
    }
}

/// Where to cut, and how large the summary may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CompactionPlan {
    cut: usize,
    summary_cap: usize,
}

pub struct ContextWindowManager {
    gateway: Arc<dyn LanguageModelGateway>,
    config: RwLock<ContextWindowConfig>,
}

impl std::fmt::Debug for ContextWindowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextWindowManager")
            .field("gateway", &self.gateway.name())
            .finish_non_exhaustive()
    }
}

impl ContextWindowManager {
    pub fn new(
        gateway: Arc<dyn LanguageModelGateway>,
        config: ContextWindowConfig,
    ) -> Result<Self, MarketMindError> {
        config.validate()?;
        Ok(Self {
            gateway,
            config: RwLock::new(config),
        })
    }

    pub async fn config(&self) -> ContextWindowConfig {
        self.config.read().await.clone()
    }

    /// Merge a partial update. Invalid results are rejected and the old config kept.
    pub async fn update_config(
        &self,
        update: &ContextWindowConfigUpdate,
    ) -> Result<ContextWindowConfig, MarketMindError> {
        let mut config = self.config.write().await;
        let merged = config.merged(update);
        merged.validate()?;
        *config = merged.clone();
        info!(
            max_tokens = merged.max_tokens,
            threshold = merged.summarization_threshold,
            "context window config updated"
        );
        Ok(merged)
    }

    /// Whether `get_optimal_context` would compact these messages.
    pub async fn needs_summarization(&self, messages: &[Message], system_prompt: &str) -> bool {
        let config = self.config().await;
        let count = TokenCount::of(messages, system_prompt);
        over_threshold(&config, config.max_tokens, messages.len(), count)
            && plan_compaction(&config, config.max_tokens, messages).is_some()
    }

    /// Return `messages` unchanged while under budget, otherwise a compacted copy.
    pub async fn get_optimal_context(
        &self,
        messages: &[Message],
        system_prompt: &str,
        max_tokens: Option<usize>,
    ) -> OptimalContext {
        let config = self.config().await;
        let max_tokens = max_tokens.filter(|m| *m > 0).unwrap_or(config.max_tokens);
        let before = TokenCount::of(messages, system_prompt);

        if !over_threshold(&config, max_tokens, messages.len(), before) {
            return OptimalContext::unchanged(messages, before);
        }
        let Some(plan) = plan_compaction(&config, max_tokens, messages) else {
            debug!(
                messages = messages.len(),
                tokens = before.total,
                "over budget but nothing compactable"
            );
            return OptimalContext::unchanged(messages, before);
        };

        let reason = format!(
            "estimated {} tokens exceeded {:.0}% of {} token budget",
            before.total,
            config.summarization_threshold * 100.0,
            max_tokens
        );
        self.compact(messages, system_prompt, plan, before, reason)
            .await
    }

    /// Compact regardless of the threshold. Returns the input unchanged when there
    /// is no prefix worth summarizing.
    pub async fn force_summarization(
        &self,
        messages: &[Message],
        system_prompt: &str,
    ) -> OptimalContext {
        let config = self.config().await;
        let before = TokenCount::of(messages, system_prompt);
        match plan_compaction(&config, config.max_tokens, messages) {
            Some(plan) => {
                self.compact(messages, system_prompt, plan, before, "forced".to_string())
                    .await
            }
            None => OptimalContext::unchanged(messages, before),
        }
    }

    async fn compact(
        &self,
        messages: &[Message],
        system_prompt: &str,
        plan: CompactionPlan,
        before: TokenCount,
        mut reason: String,
    ) -> OptimalContext {
        let (prefix, tail) = messages.split_at(plan.cut);

        let summary = match self.generate_summary(prefix, plan.summary_cap).await {
            Ok(summary) => summary,
            Err(err) => {
                // A failed summary call is not fatal; the extractive summary stands in.
                let cause = match &err {
                    MarketMindError::SummarizationFallback(_) => "unparseable summary",
                    _ => "summary call failed",
                };
                warn!(error = %err, cause, archived = prefix.len(), "using extractive summary");
                reason.push_str(&format!("; {cause}, fallback to extractive summary ({err})"));
                extractive_summary(prefix)
            }
        };

        let mut summary_msg = summary_message(&summary, plan.summary_cap);
        if let Some(last) = prefix.last() {
            summary_msg.timestamp = last.timestamp;
        }

        let mut compacted = Vec::with_capacity(tail.len() + 1);
        compacted.push(summary_msg);
        compacted.extend_from_slice(tail);
        let after = TokenCount::of(&compacted, system_prompt);

        let record = SummarizationRecord {
            timestamp: Utc::now(),
            messages_before: messages.len(),
            messages_after: compacted.len(),
            tokens_saved: before.total.saturating_sub(after.total),
            trigger_reason: reason,
            archived_original_messages: prefix.to_vec(),
        };
        info!(
            messages_before = record.messages_before,
            messages_after = record.messages_after,
            tokens_before = before.total,
            tokens_after = after.total,
            "compacted conversation history"
        );

        OptimalContext {
            messages: compacted,
            summary: Some(summary),
            was_summarized: true,
            token_count: after,
            record: Some(record),
        }
    }

    async fn generate_summary(
        &self,
        prefix: &[Message],
        summary_cap: usize,
    ) -> Result<ContextSummary, MarketMindError> {
        let config = self.config().await;
        let transcript = truncate_to_tokens(
            &serialize_messages_for_summary(prefix),
            config.max_tokens,
        );
        let reply_tokens = summary_cap.saturating_sub(MESSAGE_OVERHEAD_TOKENS).max(1);
        let request = CompletionRequest::completion(
            summary_request_messages(&transcript, reply_tokens),
            GenerationSettings::builder()
                .max_tokens(u32::try_from(reply_tokens).unwrap_or(u32::MAX))
                .temperature(0.2)
                .build(),
        );
        let response = self.gateway.complete(&request).await?;
        parse_summary_reply(response.content_text(), prefix.len())
    }
}

fn over_threshold(
    config: &ContextWindowConfig,
    max_tokens: usize,
    message_count: usize,
    count: TokenCount,
) -> bool {
    message_count >= config.min_messages_to_summarize
        && count.total as f64 > max_tokens as f64 * config.summarization_threshold
}

/// Pick the retained tail and the summary budget, or `None` when compaction
/// cannot shrink anything.
fn plan_compaction(
    config: &ContextWindowConfig,
    max_tokens: usize,
    messages: &[Message],
) -> Option<CompactionPlan> {
    let len = messages.len();
    if len < 3 {
        return None;
    }
    let tail_budget = (max_tokens as f64 * config.tail_budget_fraction) as usize;

    // Start generous, then give back whole pairs until the tail fits.
    let mut keep = config.max_tail_messages.clamp(2, len - 1);
    while keep > 2 && estimate_messages_tokens(&messages[len - keep..]) > tail_budget {
        keep = keep.saturating_sub(2).max(2);
    }

    let mut cut = len - keep;
    while cut < len && messages[cut].role == Role::Tool {
        cut += 1;
    }
    if cut == 0 || cut >= len {
        return None;
    }

    let prefix_tokens = estimate_messages_tokens(&messages[..cut]);
    let summary_cap = (max_tokens as f64 * config.summary_budget_fraction) as usize;
    if prefix_tokens <= summary_cap || summary_cap <= MESSAGE_OVERHEAD_TOKENS {
        return None;
    }
    Some(CompactionPlan { cut, summary_cap })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::CompletionResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedGateway {
        reply: String,
        calls: Mutex<usize>,
    }

    impl CannedGateway {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LanguageModelGateway for CannedGateway {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, MarketMindError> {
            assert!(!request.offers_tools());
            *self.calls.lock().unwrap() += 1;
            Ok(CompletionResponse::text(self.reply.clone()))
        }
    }

    fn conversation(pairs: usize, chars: usize) -> Vec<Message> {
        (0..pairs)
            .flat_map(|i| {
                [
                    Message::user(format!("Q{i} about AAPL {}", "q".repeat(chars))),
                    Message::assistant(format!("A{i} {}", "a".repeat(chars))),
                ]
            })
            .collect()
    }

    fn config() -> ContextWindowConfig {
        ContextWindowConfig {
            max_tokens: 4_000,
            summarization_threshold: 0.6,
            ..ContextWindowConfig::default()
        }
    }

    #[tokio::test]
    async fn under_threshold_is_a_noop() {
        let gateway = CannedGateway::new("{}");
        let manager = ContextWindowManager::new(gateway.clone(), config()).unwrap();
        let messages = conversation(6, 10);

        for _ in 0..2 {
            let ctx = manager.get_optimal_context(&messages, "sys", None).await;
            assert!(!ctx.was_summarized);
            assert_eq!(ctx.messages, messages);
            assert!(ctx.record.is_none());
        }
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn too_few_messages_never_trigger() {
        let gateway = CannedGateway::new("{}");
        let manager = ContextWindowManager::new(gateway, config()).unwrap();
        let messages = conversation(4, 2_000);
        assert!(!manager.needs_summarization(&messages, "").await);
    }

    #[tokio::test]
    async fn compaction_replaces_prefix_with_one_summary() {
        let gateway = CannedGateway::new(r#"{"summary": "Discussed AAPL twelve times.", "keyPoints": ["AAPL"]}"#);
        let manager = ContextWindowManager::new(gateway.clone(), config()).unwrap();
        let messages = conversation(6, 1_000);
        assert!(manager.needs_summarization(&messages, "sys").await);

        let before = TokenCount::of(&messages, "sys");
        let ctx = manager.get_optimal_context(&messages, "sys", None).await;

        assert!(ctx.was_summarized);
        assert!(ctx.messages[0].is_context_summary());
        assert!(ctx.messages[1..].iter().all(|m| !m.is_context_summary()));
        let tail = ctx.messages.len() - 1;
        assert!((2..=10).contains(&tail));
        assert_eq!(ctx.messages[1..], messages[messages.len() - tail..]);
        assert!(ctx.token_count.total < before.total);
        assert_eq!(ctx.summary.as_ref().unwrap().summary_text, "Discussed AAPL twelve times.");

        let record = ctx.record.unwrap();
        assert_eq!(record.messages_before, 12);
        assert_eq!(record.messages_after, ctx.messages.len());
        assert_eq!(record.archived_original_messages.len(), 12 - tail);
        assert!(record.tokens_saved > 0);
        assert!(!manager.needs_summarization(&ctx.messages, "sys").await);
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back_to_extractive_summary() {
        let gateway = CannedGateway::new("Sorry, here is prose instead of JSON.");
        let manager = ContextWindowManager::new(gateway, config()).unwrap();
        let ctx = manager
            .get_optimal_context(&conversation(6, 1_000), "", None)
            .await;
        assert!(ctx.was_summarized);
        let summary = ctx.summary.unwrap();
        assert_eq!(summary.important_entities, vec!["AAPL"]);
        assert!(ctx.record.unwrap().trigger_reason.contains("fallback"));
    }

    #[test]
    fn tail_never_starts_with_tool_result() {
        let mut messages = conversation(5, 800);
        messages.insert(3, Message::tool_result("c1", &serde_json::json!({"ok": true})));
        let plan = plan_compaction(&config(), 4_000, &messages).unwrap();
        assert_eq!(plan.cut, 4);
        assert_ne!(messages[plan.cut].role, Role::Tool);
    }

    #[tokio::test]
    async fn update_config_rejects_invalid_values() {
        let gateway = CannedGateway::new("{}");
        let manager = ContextWindowManager::new(gateway, config()).unwrap();
        let err = manager
            .update_config(&ContextWindowConfigUpdate {
                summarization_threshold: Some(0.0),
                ..Default::default()
            })
            .await;
        assert!(err.is_err());
        assert_eq!(manager.config().await.summarization_threshold, 0.6);

        let updated = manager
            .update_config(&ContextWindowConfigUpdate {
                max_tokens: Some(2_000),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.max_tokens, 2_000);
    }

    #[tokio::test]
    async fn force_summarization_ignores_threshold() {
        let gateway = CannedGateway::new(r#"{"summary": "short"}"#);
        let manager = ContextWindowManager::new(gateway, config()).unwrap();
        let messages = conversation(6, 700);
        assert!(!manager.needs_summarization(&messages, "").await);
        let ctx = manager.force_summarization(&messages, "").await;
        assert!(ctx.was_summarized);
        assert_eq!(ctx.record.unwrap().trigger_reason, "forced");
    }
}

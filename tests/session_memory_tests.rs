//! Session memory across queries: compaction, persistence and introspection.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;

use common::*;
use marketmind::config::{ContextWindowConfigUpdate, MarketMindConfig};
use marketmind::error::MarketMindError;
use marketmind::orchestrator::QueryRequest;
use marketmind::session::{FileStorage, SessionStore};
use marketmind::types::Role;

const SUMMARY_REPLY: &str = r#"```json
{
  "summaryText": "The user has been tracking AAPL price action over several turns.",
  "keyPoints": ["AAPL discussed repeatedly"],
  "importantEntities": ["AAPL"],
  "inferredPreferences": ["prefers detailed answers"]
}
```"#;

fn compact_config() -> MarketMindConfig {
    let mut config = test_config();
    config.context_window.max_tokens = 4_000;
    config.context_window.summarization_threshold = 0.6;
    config
}

fn ask(query: &str, session_id: &str) -> QueryRequest {
    QueryRequest::builder()
        .query(query)
        .session_id(session_id)
        .build()
}

async fn seed(store: &SessionStore, session_id: &str, count: usize, chars: usize) {
    store.get_or_create(session_id, Some("user-1")).await.unwrap();
    for message in long_conversation(count, chars) {
        store.add_message(session_id, message).await.unwrap();
    }
}

#[tokio::test]
async fn oversized_history_is_compacted_once_into_summary_plus_tail() {
    let h = harness(compact_config()).await;
    seed(&h.store, "s-c", 12, 1_000).await;
    h.gateway.queue_text(SUMMARY_REPLY);
    h.gateway.queue_text("AAPL is flat today.");

    let response = h
        .orchestrator
        .process_query(ask("Where is AAPL now?", "s-c"))
        .await
        .unwrap();

    let meta = response.session_metadata.unwrap();
    assert!(meta.was_summarized);
    assert_eq!(meta.summarization_count, 1);

    let requests = h.gateway.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].offers_tools());

    // system prompt, summary, tail, new user question
    let decision = &requests[1].messages;
    assert_eq!(decision[0].role, Role::System);
    assert!(decision[1].is_context_summary());
    assert!(decision[1].content.contains("tracking AAPL"));
    let tail = decision.len() - 3;
    assert!((2..=10).contains(&tail), "tail of {tail} messages");
    assert!(decision[2..decision.len() - 1]
        .iter()
        .all(|m| !m.is_context_summary()));

    let session = h.store.get("s-c").await.unwrap();
    assert_eq!(session.stats.summarization_history.len(), 1);
    let record = &session.stats.summarization_history[0];
    assert_eq!(record.messages_before, 12);
    assert_eq!(record.messages_after, tail + 1);
    assert!(record.tokens_saved > 0);
    assert_eq!(record.archived_original_messages.len(), 12 - tail);
    assert!(session.stats.last_summarization.is_some());

    assert!(session.conversation_history[0].is_context_summary());
    assert_eq!(session.conversation_history.len(), tail + 3);
    assert_eq!(meta.message_count, tail + 3);
}

#[tokio::test]
async fn compacted_session_does_not_retrigger_on_the_next_query() {
    let h = harness(compact_config()).await;
    seed(&h.store, "s-again", 12, 1_000).await;
    h.gateway.queue_text(SUMMARY_REPLY);
    h.gateway.queue_text("First answer.");
    h.orchestrator
        .process_query(ask("How did AAPL close?", "s-again"))
        .await
        .unwrap();
    assert_eq!(h.gateway.call_count(), 2);

    let stats = h.orchestrator.get_context_stats("s-again").await.unwrap();
    assert!(!stats.needs_summarization);

    h.gateway.queue_text("Second answer.");
    let response = h
        .orchestrator
        .process_query(ask("And the volume?", "s-again"))
        .await
        .unwrap();

    assert_eq!(h.gateway.call_count(), 3);
    assert!(h.gateway.requests()[2].offers_tools());
    let meta = response.session_metadata.unwrap();
    assert!(!meta.was_summarized);
    assert_eq!(meta.summarization_count, 1);
}

#[tokio::test]
async fn unparseable_summary_falls_back_to_extractive_text() {
    let h = harness(compact_config()).await;
    seed(&h.store, "s-fallback", 12, 1_000).await;
    h.gateway.queue_text("I cannot summarize that.");
    h.gateway.queue_text("Answer.");

    h.orchestrator
        .process_query(ask("AAPL?", "s-fallback"))
        .await
        .unwrap();

    let session = h.store.get("s-fallback").await.unwrap();
    let record = &session.stats.summarization_history[0];
    assert!(record.trigger_reason.contains("unparseable summary, fallback to extractive summary"));
    let summary = &session.conversation_history[0];
    assert!(summary.is_context_summary());
    assert!(summary.content.contains("AAPL"));
}

#[tokio::test]
async fn failed_summary_call_still_compacts_and_answers() {
    let h = harness(compact_config()).await;
    seed(&h.store, "s-down", 12, 1_000).await;
    h.gateway.queue_error(503, "summarizer overloaded");
    h.gateway.queue_text("AAPL closed higher.");

    let response = h
        .orchestrator
        .process_query(ask("How did AAPL close?", "s-down"))
        .await
        .unwrap();
    assert_eq!(response.response, "AAPL closed higher.");
    assert!(response.session_metadata.unwrap().was_summarized);

    let session = h.store.get("s-down").await.unwrap();
    let record = &session.stats.summarization_history[0];
    assert!(record
        .trigger_reason
        .contains("summary call failed, fallback to extractive summary"));
    assert!(record.trigger_reason.contains("summarizer overloaded"));
    assert!(session.conversation_history[0].is_context_summary());
}

#[tokio::test]
async fn forced_summarization_compacts_below_the_threshold() {
    let h = harness(compact_config()).await;
    seed(&h.store, "s-force", 12, 700).await;

    let before = h.orchestrator.get_context_stats("s-force").await.unwrap();
    assert_eq!(before.message_count, 12);
    assert_eq!(before.max_tokens, 4_000);
    assert!(!before.needs_summarization);
    assert_eq!(before.summarization_count, 0);
    assert!(before.usage_percent > 0.0 && before.usage_percent < 60.0);

    h.gateway.queue_text(SUMMARY_REPLY);
    assert!(h.orchestrator.force_summarization("s-force").await.unwrap());

    let after = h.orchestrator.get_context_stats("s-force").await.unwrap();
    assert!(after.message_count < 12);
    assert_eq!(after.summarization_count, 1);
    assert!(after.last_summarization.is_some());
    assert!(after.token_count.total < before.token_count.total);

    let session = h.store.get("s-force").await.unwrap();
    assert_eq!(session.stats.summarization_history[0].trigger_reason, "forced");
}

#[tokio::test]
async fn forced_summarization_of_a_short_session_is_a_noop() {
    let h = harness(test_config()).await;
    seed(&h.store, "s-short", 2, 40).await;

    assert!(!h.orchestrator.force_summarization("s-short").await.unwrap());
    assert_eq!(h.gateway.call_count(), 0);
    assert!(matches!(
        h.orchestrator.force_summarization("missing").await,
        Err(MarketMindError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn context_window_config_updates_are_validated() {
    let h = harness(test_config()).await;

    let updated = h
        .orchestrator
        .update_context_window_config(&ContextWindowConfigUpdate {
            max_tokens: Some(16_000),
            ..ContextWindowConfigUpdate::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.max_tokens, 16_000);

    let err = h
        .orchestrator
        .update_context_window_config(&ContextWindowConfigUpdate {
            summarization_threshold: Some(0.3),
            ..ContextWindowConfigUpdate::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MarketMindError::Configuration(_)));
    assert_eq!(h.orchestrator.context_window().config().await.max_tokens, 16_000);
}

#[tokio::test]
async fn sessions_survive_a_restart_through_the_file_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("sessions.json");
    let config = test_config();

    let store = Arc::new(
        SessionStore::open(config.memory.clone(), Arc::new(FileStorage::new(path.clone()))).await,
    );
    let h = harness_on_store(
        config.clone(),
        ScriptedGateway::new(),
        MockMarketBackend::new(),
        store,
    );
    h.gateway.queue_text("MSFT is up 1%.");
    h.orchestrator
        .process_query(ask("How is $MSFT doing?", "s-disk"))
        .await
        .unwrap();
    let original = h.store.get("s-disk").await.unwrap();
    assert!(path.exists());
    drop(h);

    let reopened =
        SessionStore::open(config.memory.clone(), Arc::new(FileStorage::new(path.clone()))).await;
    let restored = reopened.get("s-disk").await.unwrap();
    assert_eq!(restored.conversation_history, original.conversation_history);
    assert_eq!(restored.preferences, original.preferences);
    assert_eq!(restored.user_id, None);
    assert_eq!(restored.stats.top_entities(1)[0].0, "MSFT");
}

#[tokio::test]
async fn exported_session_imports_into_another_store() {
    let h = harness(test_config()).await;
    h.gateway.queue_text("Quiet day.");
    h.orchestrator
        .process_query(
            QueryRequest::builder()
                .query("Anything new on NVDA?")
                .session_id("s-export")
                .user_id("u-42")
                .build(),
        )
        .await
        .unwrap();

    let export = h.store.export_session("s-export").await.unwrap();
    let json = serde_json::to_string(&export).unwrap();

    let other = SessionStore::in_memory(test_config().memory).await;
    other
        .import_session(serde_json::from_str(&json).unwrap())
        .await
        .unwrap();

    let imported = other.get("s-export").await.unwrap();
    assert_eq!(imported.user_id.as_deref(), Some("u-42"));
    assert_eq!(
        imported.conversation_history,
        export.session.conversation_history
    );
    assert!(imported.revision > export.session.revision);
}

#[tokio::test]
async fn cleared_session_starts_fresh() {
    let h = harness(test_config()).await;
    h.gateway.queue_text("One.");
    h.orchestrator
        .process_query(ask("first", "s-clear"))
        .await
        .unwrap();

    assert!(h.orchestrator.clear_session("s-clear").await);
    assert!(h.store.get("s-clear").await.is_none());

    h.gateway.queue_text("Two.");
    let response = h
        .orchestrator
        .process_query(ask("second", "s-clear"))
        .await
        .unwrap();
    assert_eq!(response.session_metadata.unwrap().message_count, 2);
}

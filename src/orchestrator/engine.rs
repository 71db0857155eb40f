//! The bounded decide/execute loop that answers one query.

use std::sync::Arc;
use std::time::Duration;

use futures::future;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::continuation::{
    ContinuationContext, ContinuationDecision, ContinuationPolicy, MarketContinuationPolicy,
};
use super::purpose::infer_purpose;
use super::types::{
    ContextStats, IterationRecord, QueryRequest, QueryResponse, SessionInfo, SessionMetadata,
};
use crate::config::{ContextWindowConfig, ContextWindowConfigUpdate, MarketMindConfig, OrchestratorConfig};
use crate::context::{ContextUsage, ContextWindowManager, TokenCount};
use crate::error::MarketMindError;
use crate::gateway::{CompletionRequest, LanguageModelGateway};
use crate::session::preferences::{extract_entities, infer_preferences};
use crate::session::{PendingCompaction, Session, SessionStore, TurnCommit};
use crate::tools::{ToolExecutionContext, ToolRegistry};
use crate::types::{GenerationSettings, Message, ToolCall, Usage};
use crate::util::timeout::with_timeout;

const SYNTHESIS_INSTRUCTION: &str = "Answer the user's question now using the information \
gathered above. Do not request any more tools. If some data could not be retrieved, say so \
briefly and answer with what is available.";

const TOP_ENTITIES_IN_PROMPT: usize = 5;
const TOP_TOOLS_IN_PROMPT: usize = 3;

/// Settings for one query after applying per-query overrides.
#[derive(Debug, Clone)]
struct ResolvedQuery {
    session_id: Option<String>,
    max_iterations: usize,
    use_memory: bool,
    include_context: bool,
    timeout: Duration,
    generation: GenerationSettings,
}

/// Session changes held back until the query finishes.
#[derive(Debug)]
struct StagedTurn {
    session_id: String,
    user_message: Message,
    compaction: Option<PendingCompaction>,
    context_tokens: usize,
}

#[derive(Debug)]
struct QueryOutcome {
    response: QueryResponse,
    staged: Option<StagedTurn>,
}

/// Drives queries through the gateway and tool registry, with session memory.
pub struct Orchestrator {
    gateway: Arc<dyn LanguageModelGateway>,
    tools: Arc<ToolRegistry>,
    store: Arc<SessionStore>,
    window: ContextWindowManager,
    policy: Arc<dyn ContinuationPolicy>,
    config: OrchestratorConfig,
    generation: GenerationSettings,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("gateway", &self.gateway.name())
            .field("tools", &self.tools)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn LanguageModelGateway>,
        tools: Arc<ToolRegistry>,
        store: Arc<SessionStore>,
        config: &MarketMindConfig,
    ) -> Result<Self, MarketMindError> {
        config.validate()?;
        let window = ContextWindowManager::new(gateway.clone(), config.context_window.clone())?;
        let generation = GenerationSettings {
            temperature: config.gateway.temperature,
            max_tokens: config.gateway.max_tokens,
            ..GenerationSettings::default()
        };
        Ok(Self {
            gateway,
            tools,
            store,
            window,
            policy: Arc::new(MarketContinuationPolicy::default()),
            config: config.orchestrator.clone(),
            generation,
        })
    }

    /// Replace the continuation strategy.
    pub fn with_policy(mut self, policy: Arc<dyn ContinuationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn context_window(&self) -> &ContextWindowManager {
        &self.window
    }

    pub async fn process_query(
        &self,
        request: QueryRequest,
    ) -> Result<QueryResponse, MarketMindError> {
        self.process_query_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`Self::process_query`], aborting when `cancel` fires. An aborted or
    /// timed-out query leaves the session history untouched.
    pub async fn process_query_with_cancel(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<QueryResponse, MarketMindError> {
        let plan = self.resolve(&request)?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(session_id = ?plan.session_id, "query canceled");
                Err(MarketMindError::Canceled)
            }
            outcome = with_timeout(plan.timeout, self.run(&request, &plan)) => outcome,
        }?;

        self.commit(&request, outcome).await
    }

    pub async fn get_session_info(&self, session_id: &str) -> Result<SessionInfo, MarketMindError> {
        let session = self.session(session_id).await?;
        Ok(SessionInfo {
            top_entities: session.stats.top_entities(TOP_ENTITIES_IN_PROMPT),
            top_tools: session.stats.top_tools(TOP_TOOLS_IN_PROMPT),
            recent_queries: session.stats.recent_queries.iter().cloned().collect(),
            message_count: session.message_count(),
            session_id: session.session_id,
            user_id: session.user_id,
            start_time: session.start_time,
            last_activity: session.last_activity,
            preferences: session.preferences,
        })
    }

    pub async fn get_context_stats(&self, session_id: &str) -> Result<ContextStats, MarketMindError> {
        let session = self.session(session_id).await?;
        let prompt = contextual_system_prompt(&self.config.system_prompt, &session);
        let history = &session.conversation_history;
        let token_count = TokenCount::of(history, &prompt);
        let max_tokens = self.window.config().await.max_tokens;
        Ok(ContextStats {
            message_count: history.len(),
            token_count,
            max_tokens,
            usage_percent: ContextUsage::new(token_count.total, max_tokens).usage_percent,
            needs_summarization: self.window.needs_summarization(history, &prompt).await,
            summarization_count: session.stats.summarization_history.len(),
            last_summarization: session.stats.last_summarization,
        })
    }

    /// Compact a session's history now, regardless of the threshold.
    /// Returns whether the history changed.
    pub async fn force_summarization(&self, session_id: &str) -> Result<bool, MarketMindError> {
        let session = self.session(session_id).await?;
        let prompt = contextual_system_prompt(&self.config.system_prompt, &session);
        let ctx = self
            .window
            .force_summarization(&session.conversation_history, &prompt)
            .await;
        let Some(record) = ctx.record else {
            debug!(session_id, "nothing to summarize");
            return Ok(false);
        };
        self.store
            .apply_compaction(
                session_id,
                PendingCompaction {
                    base_revision: session.revision,
                    messages: ctx.messages,
                    record,
                },
            )
            .await
    }

    pub async fn update_context_window_config(
        &self,
        update: &ContextWindowConfigUpdate,
    ) -> Result<ContextWindowConfig, MarketMindError> {
        self.window.update_config(update).await
    }

    pub async fn clear_session(&self, session_id: &str) -> bool {
        self.store.clear_session(session_id).await
    }

    async fn session(&self, session_id: &str) -> Result<Session, MarketMindError> {
        self.store
            .get(session_id)
            .await
            .ok_or_else(|| MarketMindError::SessionNotFound(session_id.to_string()))
    }

    fn resolve(&self, request: &QueryRequest) -> Result<ResolvedQuery, MarketMindError> {
        if request.query.trim().is_empty() {
            return Err(MarketMindError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }
        let options = &request.options;
        let max_iterations = options.max_iterations.unwrap_or(self.config.max_iterations);
        if max_iterations == 0 {
            return Err(MarketMindError::InvalidArgument(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        let use_memory = options.use_memory.unwrap_or(self.config.use_memory);
        let requested_id = request
            .session_id
            .clone()
            .filter(|id| !id.trim().is_empty());
        let session_id = if use_memory {
            Some(requested_id.unwrap_or_else(|| Uuid::new_v4().to_string()))
        } else {
            requested_id
        };

        Ok(ResolvedQuery {
            session_id,
            max_iterations,
            use_memory,
            include_context: options.include_context.unwrap_or(self.config.include_context),
            timeout: options
                .timeout
                .unwrap_or(Duration::from_millis(self.config.query_timeout_ms)),
            generation: options
                .generation
                .clone()
                .unwrap_or_else(|| self.generation.clone()),
        })
    }

    async fn run(
        &self,
        request: &QueryRequest,
        plan: &ResolvedQuery,
    ) -> Result<QueryOutcome, MarketMindError> {
        let user_message = Message::user(request.query.clone());
        let mut system_prompt = self.config.system_prompt.clone();
        let mut history = Vec::new();
        let mut staged = None;

        if let (true, Some(session_id)) = (plan.use_memory, plan.session_id.as_deref()) {
            self.store
                .get_or_create(session_id, request.user_id.as_deref())
                .await?;
            for entity in extract_entities(&request.query) {
                self.store.update_entity_access(session_id, &entity).await?;
            }
            let session = self.session(session_id).await?;

            let mut compaction = None;
            let mut context_tokens = 0;
            if plan.include_context {
                system_prompt = contextual_system_prompt(&system_prompt, &session);
                let ctx = self
                    .window
                    .get_optimal_context(&session.conversation_history, &system_prompt, None)
                    .await;
                context_tokens = ctx.token_count.total;
                if let Some(record) = ctx.record {
                    compaction = Some(PendingCompaction {
                        base_revision: session.revision,
                        messages: ctx.messages.clone(),
                        record,
                    });
                }
                history = ctx.messages;
            }
            staged = Some(StagedTurn {
                session_id: session_id.to_string(),
                user_message: user_message.clone(),
                compaction,
                context_tokens,
            });
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(history);
        messages.push(user_message);

        let response = self.drive(&request.query, messages, plan).await?;
        Ok(QueryOutcome { response, staged })
    }

    /// The decide/execute loop. Decision calls are capped at `max_iterations - 1`;
    /// the remaining slot is the tool-free synthesis.
    async fn drive(
        &self,
        query: &str,
        mut messages: Vec<Message>,
        plan: &ResolvedQuery,
    ) -> Result<QueryResponse, MarketMindError> {
        let catalog = self.tools.catalog();
        let decision_budget = plan.max_iterations - 1;
        let session_id = plan.session_id.as_deref();

        let mut usage = Usage::default();
        let mut tools_used: Vec<String> = Vec::new();
        let mut attempted: Vec<String> = Vec::new();
        let mut details: Vec<IterationRecord> = Vec::new();
        let mut candidate: Option<String> = None;
        let mut decisions = 0usize;
        let mut tool_results_seen = false;

        while decisions < decision_budget {
            decisions += 1;
            let iteration = decisions;

            let request =
                CompletionRequest::decision(messages.clone(), catalog.clone(), plan.generation.clone());
            let response = self.gateway.complete(&request).await.map_err(|err| {
                warn!(?session_id, iteration, error = %err, "decision call failed");
                MarketMindError::gateway(iteration, &attempted, &err)
            })?;
            usage.merge(&response.usage);
            let text = response.content_text().trim().to_string();

            if !response.has_tool_calls() {
                let decision = self.policy.decide(&ContinuationContext {
                    query,
                    iteration,
                    decision_budget,
                    tools_used: &tools_used,
                    latest_text: &text,
                    requested_tools: false,
                });
                debug!(?session_id, iteration, ?decision, "answer without tool calls");
                match decision {
                    ContinuationDecision::Continue { nudge } if iteration < decision_budget => {
                        if !text.is_empty() {
                            messages.push(Message::assistant(text.clone()));
                            candidate = Some(text);
                        }
                        if let Some(nudge) = nudge {
                            messages.push(Message::system(nudge));
                        }
                        continue;
                    }
                    ContinuationDecision::Synthesize if tool_results_seen => break,
                    _ if !text.is_empty() => {
                        return Ok(build_response(text, tools_used, decisions, details, usage));
                    }
                    _ if tool_results_seen => break,
                    _ => continue,
                }
            }

            let calls = response.tool_calls;
            messages.push(Message::assistant_tool_calls(text, calls.clone()));
            let record = self
                .execute_iteration(iteration, &calls, session_id, &mut messages)
                .await;
            for name in &record.tools_called {
                attempted.push(name.clone());
                if !tools_used.contains(name) {
                    tools_used.push(name.clone());
                }
            }
            debug!(
                ?session_id,
                iteration,
                tools = ?record.tools_called,
                failed = record.failed_tools.len(),
                purpose = %record.inferred_purpose,
                "tool iteration complete"
            );
            details.push(record);
            tool_results_seen = true;

            let decision = self.policy.decide(&ContinuationContext {
                query,
                iteration,
                decision_budget,
                tools_used: &tools_used,
                latest_text: "",
                requested_tools: true,
            });
            match decision {
                ContinuationDecision::Continue { nudge } if iteration < decision_budget => {
                    if let Some(nudge) = nudge {
                        messages.push(Message::system(nudge));
                    }
                }
                _ => break,
            }
        }

        if tool_results_seen || decision_budget == 0 {
            let iteration = decisions + 1;
            messages.push(Message::system(SYNTHESIS_INSTRUCTION));
            let request = CompletionRequest::completion(messages, plan.generation.clone());
            let response = self.gateway.complete(&request).await.map_err(|err| {
                warn!(?session_id, iteration, error = %err, "synthesis call failed");
                MarketMindError::gateway(iteration, &attempted, &err)
            })?;
            usage.merge(&response.usage);
            let answer = response.content_text().trim();
            if answer.is_empty() {
                return Err(MarketMindError::IterationExhausted {
                    limit: plan.max_iterations,
                    tools_attempted: attempted,
                });
            }
            return Ok(build_response(
                answer.to_string(),
                tools_used,
                iteration,
                details,
                usage,
            ));
        }

        match candidate {
            Some(text) => Ok(build_response(text, tools_used, decisions, details, usage)),
            None => Err(MarketMindError::IterationExhausted {
                limit: plan.max_iterations,
                tools_attempted: attempted,
            }),
        }
    }

    /// Run every requested call concurrently and append one tool message per call.
    /// Failures become `{"error": ..}` payloads.
    async fn execute_iteration(
        &self,
        iteration: usize,
        calls: &[ToolCall],
        session_id: Option<&str>,
        messages: &mut Vec<Message>,
    ) -> IterationRecord {
        let results = future::join_all(calls.iter().map(|call| {
            let ctx = ToolExecutionContext {
                session_id: session_id.map(str::to_string),
                tool_call_id: Some(call.id.clone()),
            };
            let tools = &self.tools;
            async move { tools.execute(&call.name, &call.arguments, &ctx).await }
        }))
        .await;

        let mut failed_tools = Vec::new();
        for (call, result) in calls.iter().zip(results) {
            let payload = match result {
                Ok(value) => value,
                Err(err) => {
                    warn!(iteration, tool = %call.name, error = %err, "tool call failed");
                    failed_tools.push(call.name.clone());
                    json!({ "error": err.to_string() })
                }
            };
            messages.push(Message::tool_result(call.id.clone(), &payload));
        }

        let tools_called: Vec<String> = calls.iter().map(|c| c.name.clone()).collect();
        IterationRecord {
            iteration_index: iteration,
            inferred_purpose: infer_purpose(&tools_called),
            tool_arguments: calls.iter().map(|c| c.arguments.clone()).collect(),
            tools_called,
            failed_tools,
        }
    }

    async fn commit(
        &self,
        request: &QueryRequest,
        outcome: QueryOutcome,
    ) -> Result<QueryResponse, MarketMindError> {
        let QueryOutcome {
            mut response,
            staged,
        } = outcome;
        let Some(staged) = staged else {
            return Ok(response);
        };

        let mut assistant = Message::assistant(response.response.clone())
            .with_metadata(json!({ "iterationsUsed": response.iterations_used }));
        if !response.tools_used.is_empty() {
            assistant = assistant.with_tools_used(response.tools_used.clone());
        }
        let preferences = infer_preferences(&request.query, &response.tools_used);

        let was_summarized = self
            .store
            .commit_turn(
                &staged.session_id,
                TurnCommit {
                    compaction: staged.compaction,
                    messages: vec![staged.user_message, assistant],
                    preferences: (!preferences.is_empty()).then_some(preferences),
                },
            )
            .await?;

        let session = self.session(&staged.session_id).await?;
        info!(
            session_id = %staged.session_id,
            iterations = response.iterations_used,
            tools = response.tools_used.len(),
            was_summarized,
            "query answered"
        );
        response.session_metadata = Some(SessionMetadata {
            session_id: staged.session_id,
            message_count: session.message_count(),
            was_summarized,
            context_tokens: staged.context_tokens,
            summarization_count: session.stats.summarization_history.len(),
        });
        Ok(response)
    }
}

fn build_response(
    response: String,
    tools_used: Vec<String>,
    iterations_used: usize,
    iteration_details: Vec<IterationRecord>,
    usage: Usage,
) -> QueryResponse {
    QueryResponse {
        response,
        tools_used,
        iterations_used,
        iteration_details,
        session_metadata: None,
        usage,
    }
}

/// Base prompt plus a digest of the session's preferences and habits.
pub fn contextual_system_prompt(base: &str, session: &Session) -> String {
    let prefs = &session.preferences;
    let mut lines = Vec::new();

    lines.push(format!("Preferred analysis style: {}", prefs.analysis_style));
    if !prefs.preferred_entities.is_empty() {
        lines.push(format!("Instruments of interest: {}", prefs.preferred_entities.join(", ")));
    }
    if !prefs.preferred_categories.is_empty() {
        lines.push(format!("Data categories of interest: {}", prefs.preferred_categories.join(", ")));
    }
    let entities = session.stats.top_entities(TOP_ENTITIES_IN_PROMPT);
    if !entities.is_empty() {
        let listed: Vec<String> = entities
            .iter()
            .map(|(name, count)| format!("{name} ({count})"))
            .collect();
        lines.push(format!("Frequently discussed: {}", listed.join(", ")));
    }
    let tools = session.stats.top_tools(TOP_TOOLS_IN_PROMPT);
    if !tools.is_empty() {
        let listed: Vec<&str> = tools.iter().map(|(name, _)| name.as_str()).collect();
        lines.push(format!("Frequently used tools: {}", listed.join(", ")));
    }
    if prefs.locale != "en-US" {
        lines.push(format!("Locale: {}", prefs.locale));
    }

    format!("{base}\n\nUser context:\n- {}", lines.join("\n- "))
}

//! Shared test helpers: a scripted gateway and a mock market backend.
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use marketmind::config::MarketMindConfig;
use marketmind::error::MarketMindError;
use marketmind::gateway::{CompletionRequest, CompletionResponse, LanguageModelGateway};
use marketmind::session::SessionStore;
use marketmind::tools::{MarketDataBackend, MarketToolCall, ToolRegistry};
use marketmind::types::{Message, Role, ToolCall, Usage};
use marketmind::Orchestrator;

enum Reply {
    Ok(CompletionResponse),
    Fail { status: u16, message: String },
}

/// A gateway that returns queued replies in order and records every request.
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Queue a plain text answer.
    pub fn queue_text(&self, text: &str) {
        let mut response = CompletionResponse::text(text);
        response.usage = Usage {
            input_tokens: 10,
            output_tokens: 20,
            total_tokens: 30,
        };
        self.replies.lock().unwrap().push_back(Reply::Ok(response));
    }

    /// Queue a reply requesting the given `(name, arguments)` tool calls.
    pub fn queue_tool_calls(&self, calls: &[(&str, serde_json::Value)]) {
        let offset = self.replies.lock().unwrap().len();
        let calls = calls
            .iter()
            .enumerate()
            .map(|(i, (name, arguments))| ToolCall {
                id: format!("call_{offset}_{i}"),
                name: name.to_string(),
                arguments: arguments.clone(),
            })
            .collect();
        let mut response = CompletionResponse::tool_calls(calls);
        response.usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        };
        self.replies.lock().unwrap().push_back(Reply::Ok(response));
    }

    /// Queue an upstream API failure.
    pub fn queue_error(&self, status: u16, message: &str) {
        self.replies.lock().unwrap().push_back(Reply::Fail {
            status,
            message: message.to_string(),
        });
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn pending(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, MarketMindError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Ok(response)) => Ok(response),
            Some(Reply::Fail { status, message }) => Err(MarketMindError::api(status, message)),
            None => Ok(CompletionResponse::text("Mock response")),
        }
    }
}

/// Market backend that echoes each decoded call, failing for selected tools.
#[derive(Default)]
pub struct MockMarketBackend {
    failing: HashSet<String>,
    calls: Mutex<Vec<MarketToolCall>>,
}

impl MockMarketBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(tools: &[&str]) -> Self {
        Self {
            failing: tools.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<MarketToolCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketDataBackend for MockMarketBackend {
    async fn call(&self, call: MarketToolCall) -> Result<serde_json::Value, MarketMindError> {
        let name = call.tool_name();
        self.calls.lock().unwrap().push(call.clone());
        if self.failing.contains(name) {
            return Err(MarketMindError::tool(name, "upstream unavailable"));
        }
        Ok(json!({ "source": "mock", "tool": name, "request": call }))
    }
}

/// Defaults with persistence kept out of the user's home directory.
pub fn test_config() -> MarketMindConfig {
    let mut config = MarketMindConfig::default();
    config.orchestrator.system_prompt = "You answer market questions.".to_string();
    config
}

pub struct Harness {
    pub gateway: Arc<ScriptedGateway>,
    pub backend: Arc<MockMarketBackend>,
    pub store: Arc<SessionStore>,
    pub orchestrator: Orchestrator,
}

pub async fn harness(config: MarketMindConfig) -> Harness {
    harness_with(config, ScriptedGateway::new(), MockMarketBackend::new()).await
}

pub async fn harness_with(
    config: MarketMindConfig,
    gateway: ScriptedGateway,
    backend: MockMarketBackend,
) -> Harness {
    let store = Arc::new(SessionStore::in_memory(config.memory.clone()).await);
    harness_on_store(config, gateway, backend, store)
}

pub fn harness_on_store(
    config: MarketMindConfig,
    gateway: ScriptedGateway,
    backend: MockMarketBackend,
    store: Arc<SessionStore>,
) -> Harness {
    let gateway = Arc::new(gateway);
    let backend = Arc::new(backend);
    let tools = Arc::new(ToolRegistry::with_market_backend(backend.clone()));
    let orchestrator = Orchestrator::new(gateway.clone(), tools, store.clone(), &config)
        .expect("valid test config");
    Harness {
        gateway,
        backend,
        store,
        orchestrator,
    }
}

/// Messages of the given role in a request, in order.
pub fn messages_with_role(request: &CompletionRequest, role: Role) -> Vec<Message> {
    request
        .messages
        .iter()
        .filter(|m| m.role == role)
        .cloned()
        .collect()
}

/// Alternating user/assistant messages of `chars` characters each.
pub fn long_conversation(count: usize, chars: usize) -> Vec<Message> {
    (0..count)
        .map(|i| {
            let body = format!("turn {i} about AAPL ").repeat(chars / 18 + 1);
            let body: String = body.chars().take(chars).collect();
            if i % 2 == 0 {
                Message::user(body)
            } else {
                Message::assistant(body)
            }
        })
        .collect()
}

//! OpenAI-compatible Chat Completions gateway.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::http::{bearer_headers, build_client, status_to_error};
use super::{CompletionRequest, CompletionResponse, LanguageModelGateway};
use crate::config::GatewayConfig;
use crate::error::MarketMindError;
use crate::types::{FinishReason, Message, Role, ToolCall, Usage};
use crate::util::retry::RetryPolicy;

/// Gateway speaking the `/chat/completions` wire format.
pub struct OpenAiCompatibleGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiCompatibleGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleGateway")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

impl OpenAiCompatibleGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, MarketMindError> {
        if config.base_url.trim().is_empty() {
            return Err(MarketMindError::Configuration(
                "gateway base_url must not be empty".to_string(),
            ));
        }
        if config.model.trim().is_empty() {
            return Err(MarketMindError::Configuration(
                "gateway model must not be empty".to_string(),
            ));
        }
        let client = build_client(Duration::from_secs(config.request_timeout_secs.max(1)))?;
        let retry = RetryPolicy::default().with_max_attempts(config.max_attempts);
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    /// Override the retry policy (tests use short backoffs).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_openai).collect();

        let mut body = serde_json::Map::new();
        body.insert("model".into(), self.config.model.clone().into());
        body.insert("messages".into(), messages.into());

        let settings = &request.settings;
        if let Some(max) = settings.max_tokens.or(self.config.max_tokens) {
            body.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = settings.temperature.or(self.config.temperature) {
            body.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = settings.top_p {
            body.insert("top_p".into(), top_p.into());
        }
        if let Some(ref stops) = settings.stop_sequences {
            body.insert("stop".into(), json!(stops));
        }
        if let Some(seed) = settings.seed {
            body.insert("seed".into(), seed.into());
        }
        if let Some(ref user) = settings.user {
            body.insert("user".into(), user.clone().into());
        }

        if let Some(ref tools) = request.tools {
            if !tools.is_empty() {
                let tool_defs: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect();
                body.insert("tools".into(), tool_defs.into());
            }
        }

        Value::Object(body)
    }

    async fn send_once(&self, body: &Value) -> Result<CompletionResponse, MarketMindError> {
        let resp = self
            .client
            .post(self.endpoint())
            .headers(bearer_headers(self.config.api_key.as_deref()))
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let data: OpenAiChatResponse = resp.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| MarketMindError::api(status, "no choices in completion response"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::String(tc.function.arguments)),
            })
            .collect();

        Ok(CompletionResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            usage: data
                .usage
                .map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                })
                .unwrap_or_default(),
            finish_reason: choice.finish_reason.as_deref().and_then(parse_finish_reason),
        })
    }
}

#[async_trait]
impl LanguageModelGateway for OpenAiCompatibleGateway {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, MarketMindError> {
        let body = self.build_request_body(request);
        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = request.offers_tools(),
            "gateway completion"
        );
        self.retry.execute(|| self.send_once(&body)).await
    }
}

fn parse_finish_reason(s: &str) -> Option<FinishReason> {
    match s {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

fn message_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|call| {
                    let arguments = match &call.arguments {
                        Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    };
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": arguments },
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        role => json!({ "role": role.to_string(), "content": msg.content }),
    }
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

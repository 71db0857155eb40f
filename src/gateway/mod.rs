//! Language-model gateway contract.
//!
//! The orchestrator needs two call shapes: a tool-enabled decision call and a
//! tool-free synthesis call. Both go through [`LanguageModelGateway::complete`];
//! the difference is whether [`CompletionRequest::tools`] is set.

pub mod http;
pub mod openai_compatible;

use async_trait::async_trait;

use crate::error::MarketMindError;
use crate::tools::ToolDefinition;
use crate::types::{FinishReason, GenerationSettings, Message, ToolCall, Usage};

pub use openai_compatible::OpenAiCompatibleGateway;

/// A request sent to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// Tool catalog offered to the model; `None` for pure completions.
    pub tools: Option<Vec<ToolDefinition>>,
    pub settings: GenerationSettings,
}

impl CompletionRequest {
    /// Tool-enabled decision call.
    pub fn decision(
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            messages,
            tools: (!tools.is_empty()).then_some(tools),
            settings,
        }
    }

    /// Tool-free completion (final synthesis, summarization).
    pub fn completion(messages: Vec<Message>, settings: GenerationSettings) -> Self {
        Self {
            messages,
            tools: None,
            settings,
        }
    }

    pub fn offers_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|tools| !tools.is_empty())
    }
}

/// Gateway reply: final text, requested tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: Some(FinishReason::Stop),
            ..Self::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            finish_reason: Some(FinishReason::ToolCalls),
            ..Self::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Text content, empty when the model produced none.
    pub fn content_text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// External capability that decides next actions or produces final text.
#[async_trait]
pub trait LanguageModelGateway: Send + Sync {
    /// Gateway name for logs (e.g. "openai-compatible").
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, MarketMindError>;
}

//! Tool registry: the catalog the model sees and the single execution boundary.

use std::collections::HashMap;
use std::sync::Arc;

use super::arguments::ToolArguments;
use super::market::{market_tools, MarketDataBackend};
use super::tool::{Tool, ToolExecutionContext};
use super::types::ToolDefinition;
use super::validation::validate_arguments;
use crate::error::MarketMindError;

/// Registry of callable tools, keyed by name.
///
/// Arguments are validated against the tool's input schema here and nowhere
/// else; failures come back as [`MarketMindError::ToolExecution`] so the
/// orchestrator can hand them to the model as data.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the market catalog served by `backend`.
    pub fn with_market_backend(backend: Arc<dyn MarketDataBackend>) -> Self {
        let mut registry = Self::new();
        for tool in market_tools(backend) {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool. A tool with the same name replaces the previous one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        } else {
            tracing::debug!(tool = %name, "replacing registered tool");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Catalog entries in registration order.
    pub fn catalog(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Validate and execute a named tool.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &serde_json::Value,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, MarketMindError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| MarketMindError::tool(name, format!("Tool '{name}' not found")))?;

        validate_arguments(arguments, &tool.parameters().schema).map_err(|violation| {
            MarketMindError::tool(name, format!("Argument validation failed: {violation}"))
        })?;

        let args = ToolArguments::new(arguments.clone());
        tool.execute(&args, ctx).await.map_err(|err| match err {
            err @ MarketMindError::ToolExecution { .. } => err,
            other => MarketMindError::tool(name, other.to_string()),
        })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

//! Configuration system (layered: defaults < TOML file < environment).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MarketMindError;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a market data analyst. Answer questions about \
stocks, indices and market conditions using the available tools. Call tools to fetch \
current data instead of guessing, cite the figures you retrieved, and keep answers \
focused on what was asked.";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct MarketMindConfig {
    pub orchestrator: OrchestratorConfig,
    pub memory: MemoryConfig,
    pub context_window: ContextWindowConfig,
    pub gateway: GatewayConfig,
}

/// Orchestration loop defaults; per-query options override them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_iterations: usize,
    pub use_memory: bool,
    pub include_context: bool,
    /// Caller-level timeout for a whole query; `0` disables it.
    pub query_timeout_ms: u64,
    pub system_prompt: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            use_memory: true,
            include_context: true,
            query_timeout_ms: 120_000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Session store limits and persistence location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_conversation_history: usize,
    pub max_recent_queries: usize,
    pub session_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    pub storage_path: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_conversation_history: 50,
            max_recent_queries: 20,
            session_timeout_secs: 86_400,
            cleanup_interval_secs: 3_600,
            storage_path: default_data_dir().join("sessions.json"),
        }
    }
}

/// Context window budget and compaction policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextWindowConfig {
    pub max_tokens: usize,
    /// Fraction of `max_tokens` above which compaction triggers.
    pub summarization_threshold: f64,
    pub min_messages_to_summarize: usize,
    /// Most messages the retained tail may start with before shrinking.
    pub max_tail_messages: usize,
    /// Fraction of `max_tokens` the retained tail must fit in.
    pub tail_budget_fraction: f64,
    /// Fraction of `max_tokens` the generated summary may occupy.
    pub summary_budget_fraction: f64,
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8_000,
            summarization_threshold: 0.7,
            min_messages_to_summarize: 10,
            max_tail_messages: 10,
            tail_budget_fraction: 0.4,
            summary_budget_fraction: 0.1,
        }
    }
}

impl ContextWindowConfig {
    pub fn validate(&self) -> Result<(), MarketMindError> {
        if self.max_tokens == 0 {
            return Err(MarketMindError::Configuration(
                "context_window.max_tokens must be positive".to_string(),
            ));
        }
        for (key, value) in [
            ("summarization_threshold", self.summarization_threshold),
            ("tail_budget_fraction", self.tail_budget_fraction),
            ("summary_budget_fraction", self.summary_budget_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(MarketMindError::Configuration(format!(
                    "context_window.{key} must be within (0, 1], got {value}"
                )));
            }
        }
        if self.max_tail_messages < 2 {
            return Err(MarketMindError::Configuration(
                "context_window.max_tail_messages must keep at least one pair".to_string(),
            ));
        }
        // A compacted history (summary + tail) has to land below the trigger.
        if self.tail_budget_fraction + self.summary_budget_fraction >= self.summarization_threshold
        {
            return Err(MarketMindError::Configuration(format!(
                "context_window.tail_budget_fraction + summary_budget_fraction ({}) must stay below summarization_threshold ({})",
                self.tail_budget_fraction + self.summary_budget_fraction,
                self.summarization_threshold
            )));
        }
        Ok(())
    }

    /// Apply a partial update; unset fields keep their current value.
    pub fn merged(&self, update: &ContextWindowConfigUpdate) -> Self {
        Self {
            max_tokens: update.max_tokens.unwrap_or(self.max_tokens),
            summarization_threshold: update
                .summarization_threshold
                .unwrap_or(self.summarization_threshold),
            min_messages_to_summarize: update
                .min_messages_to_summarize
                .unwrap_or(self.min_messages_to_summarize),
            max_tail_messages: update.max_tail_messages.unwrap_or(self.max_tail_messages),
            tail_budget_fraction: update
                .tail_budget_fraction
                .unwrap_or(self.tail_budget_fraction),
            summary_budget_fraction: update
                .summary_budget_fraction
                .unwrap_or(self.summary_budget_fraction),
        }
    }
}

/// Partial [`ContextWindowConfig`] accepted at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextWindowConfigUpdate {
    pub max_tokens: Option<usize>,
    pub summarization_threshold: Option<f64>,
    pub min_messages_to_summarize: Option<usize>,
    pub max_tail_messages: Option<usize>,
    pub tail_budget_fraction: Option<f64>,
    pub summary_budget_fraction: Option<f64>,
}

/// Settings for the OpenAI-compatible HTTP gateway.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: Some(0.2),
            max_tokens: Some(1_500),
            request_timeout_secs: 120,
            max_attempts: 3,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl MarketMindConfig {
    /// Parse a TOML document; missing sections and keys take defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, MarketMindError> {
        toml::from_str(raw).map_err(|e| MarketMindError::Configuration(e.to_string()))
    }

    /// Load a TOML file (when present), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, MarketMindError> {
        let mut config = match path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(raw) => Self::from_toml_str(&raw)?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "config file absent, using defaults");
                    Self::default()
                }
                Err(err) => return Err(err.into()),
            },
            None => Self::default(),
        };
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, MarketMindError> {
        Self::load(None)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENAI_API_KEY").or_else(|| lookup("MARKETMIND_API_KEY")) {
            self.gateway.api_key = Some(key);
        }
        if let Some(url) = lookup("MARKETMIND_BASE_URL").or_else(|| lookup("OPENAI_BASE_URL")) {
            self.gateway.base_url = url;
        }
        if let Some(model) = lookup("MARKETMIND_MODEL") {
            self.gateway.model = model;
        }
        if let Some(path) = lookup("MARKETMIND_STORAGE_PATH") {
            self.memory.storage_path = PathBuf::from(path);
        }
        override_parsed(&lookup, "MARKETMIND_MAX_ITERATIONS", &mut self.orchestrator.max_iterations);
        override_parsed(&lookup, "MARKETMIND_QUERY_TIMEOUT_MS", &mut self.orchestrator.query_timeout_ms);
        override_parsed(&lookup, "MARKETMIND_MAX_TOKENS", &mut self.context_window.max_tokens);
        override_parsed(
            &lookup,
            "MARKETMIND_SUMMARIZATION_THRESHOLD",
            &mut self.context_window.summarization_threshold,
        );
        override_parsed(
            &lookup,
            "MARKETMIND_SESSION_TIMEOUT_SECS",
            &mut self.memory.session_timeout_secs,
        );
        override_parsed(
            &lookup,
            "MARKETMIND_MAX_HISTORY",
            &mut self.memory.max_conversation_history,
        );
    }

    pub fn validate(&self) -> Result<(), MarketMindError> {
        if self.orchestrator.max_iterations == 0 {
            return Err(MarketMindError::Configuration(
                "orchestrator.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.memory.max_conversation_history == 0 {
            return Err(MarketMindError::Configuration(
                "memory.max_conversation_history must be at least 1".to_string(),
            ));
        }
        self.context_window.validate()
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

/// `~/.marketmind`, or `.marketmind` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".marketmind"))
        .unwrap_or_else(|| PathBuf::from(".marketmind"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let config = MarketMindConfig::from_toml_str(
            r#"
            [context_window]
            max_tokens = 4000
            summarization_threshold = 0.6

            [orchestrator]
            max_iterations = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.context_window.max_tokens, 4000);
        assert_eq!(config.context_window.summarization_threshold, 0.6);
        assert_eq!(config.context_window.min_messages_to_summarize, 10);
        assert_eq!(config.orchestrator.max_iterations, 3);
        assert!(config.orchestrator.use_memory);
        assert_eq!(config.memory.max_conversation_history, 50);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-env"),
            ("MARKETMIND_MAX_ITERATIONS", "7"),
            ("MARKETMIND_MAX_TOKENS", "not-a-number"),
        ]);
        let mut config = MarketMindConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.gateway.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.orchestrator.max_iterations, 7);
        assert_eq!(config.context_window.max_tokens, 8_000);
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut config = MarketMindConfig::default();
        config.context_window.summarization_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(MarketMindError::Configuration(_))
        ));
    }

    #[test]
    fn validate_rejects_budgets_that_reach_the_trigger() {
        let config = ContextWindowConfig {
            summarization_threshold: 0.5,
            ..ContextWindowConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_iterations() {
        let mut config = MarketMindConfig::default();
        config.orchestrator.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_update_merges_only_set_fields() {
        let base = ContextWindowConfig::default();
        let merged = base.merged(&ContextWindowConfigUpdate {
            max_tokens: Some(4_000),
            ..Default::default()
        });
        assert_eq!(merged.max_tokens, 4_000);
        assert_eq!(merged.summarization_threshold, base.summarization_threshold);
    }

    #[test]
    fn debug_output_hides_api_key() {
        let config = GatewayConfig {
            api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("sk-secret"));
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = MarketMindConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(config.orchestrator.max_iterations >= 1);
    }
}

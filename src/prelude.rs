//! Convenience re-exports for common use.

pub use crate::config::{ContextWindowConfigUpdate, MarketMindConfig};
pub use crate::error::{MarketMindError, Result};
pub use crate::gateway::{LanguageModelGateway, OpenAiCompatibleGateway};
pub use crate::orchestrator::{Orchestrator, QueryOptions, QueryRequest, QueryResponse};
pub use crate::session::{FileStorage, InMemoryStorage, SessionStorage, SessionStore};
pub use crate::tools::{MarketDataBackend, Tool, ToolArguments, ToolRegistry};
pub use crate::types::{GenerationSettings, Message, Role, Usage};

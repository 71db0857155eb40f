//! Tool system: schemas, validation, the registry boundary and the market catalog.

pub mod arguments;
pub mod market;
pub mod registry;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use market::{market_tool_definitions, MarketDataBackend, MarketToolCall, ToolClass};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolExecutionContext};
pub use types::{ToolDefinition, ToolParameters};

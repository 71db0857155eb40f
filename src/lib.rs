//! MarketMind: market-data question answering over a tool-calling language model.
//!
//! An [`Orchestrator`] answers each query with a bounded loop of decision calls
//! and concurrent tool executions, then commits the turn to a per-session memory
//! whose history is compacted into summaries as it approaches the context budget.
//!
//! ```no_run
//! use std::sync::Arc;
//! use marketmind::prelude::*;
//!
//! # async fn example(backend: Arc<dyn MarketDataBackend>) -> marketmind::Result<()> {
//! let config = MarketMindConfig::from_env()?;
//! let gateway = Arc::new(OpenAiCompatibleGateway::new(config.gateway.clone())?);
//! let tools = Arc::new(ToolRegistry::with_market_backend(backend));
//! let store = Arc::new(SessionStore::from_config(config.memory.clone()).await);
//! let orchestrator = Orchestrator::new(gateway, tools, store, &config)?;
//!
//! let answer = orchestrator
//!     .process_query(QueryRequest::new("How is AAPL trading today?"))
//!     .await?;
//! println!("{}", answer.response);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod prelude;
pub mod session;
pub mod tools;
pub mod types;
pub mod util;

pub use error::{MarketMindError, Result};
pub use orchestrator::Orchestrator;

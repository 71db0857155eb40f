//! Query orchestration: the bounded tool-calling loop and its session plumbing.

pub mod continuation;
pub mod engine;
pub mod purpose;
pub mod types;

pub use continuation::{
    ContinuationContext, ContinuationDecision, ContinuationPolicy, MarketContinuationPolicy,
};
pub use engine::{contextual_system_prompt, Orchestrator};
pub use purpose::infer_purpose;
pub use types::{
    ContextStats, IterationRecord, QueryOptions, QueryRequest, QueryResponse, SessionInfo,
    SessionMetadata,
};

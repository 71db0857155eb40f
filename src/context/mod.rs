//! Context window management: token estimation, compaction and summaries.

pub mod summary;
pub mod tokens;
pub mod window;

pub use tokens::{
    estimate_message_tokens, estimate_messages_tokens, estimate_text_tokens, ContextUsage,
    TokenCount,
};
pub use window::{ContextWindowManager, OptimalContext};

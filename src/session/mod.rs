//! Per-session memory: history, preferences, statistics and durable snapshots.

pub mod preferences;
pub mod storage;
pub mod store;
pub mod types;

pub use storage::{FileStorage, InMemoryStorage, SessionStorage};
pub use store::{PendingCompaction, SessionStore, TurnCommit};
pub use types::{
    AnalysisStyle, ContextData, ContextSummary, NotificationPreferences, PreferencesUpdate,
    Session, SessionExport, SessionSnapshot, SummarizationRecord, UserPreferences,
};

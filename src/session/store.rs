//! Session store: per-session serialized mutation with write-through persistence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::storage::{FileStorage, InMemoryStorage, SessionStorage};
use super::types::{
    PreferencesUpdate, Session, SessionExport, SessionSnapshot, SummarizationRecord,
    UserPreferences,
};
use crate::config::MemoryConfig;
use crate::error::MarketMindError;
use crate::types::Message;

/// A compaction computed against a specific session revision.
#[derive(Debug, Clone)]
pub struct PendingCompaction {
    /// Revision the compaction was computed from; a mismatch discards it.
    pub base_revision: u64,
    /// Replacement history: one summary message followed by the retained tail.
    pub messages: Vec<Message>,
    pub record: SummarizationRecord,
}

/// Everything one query adds to a session, applied under a single lock.
#[derive(Debug, Clone, Default)]
pub struct TurnCommit {
    pub compaction: Option<PendingCompaction>,
    pub messages: Vec<Message>,
    pub preferences: Option<PreferencesUpdate>,
}

/// Owns every [`Session`]. Callers receive clones and route mutations back here.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    /// Last persisted copy of each session. Its lock serializes snapshot writes.
    persisted: Mutex<HashMap<String, Session>>,
    storage: Arc<dyn SessionStorage>,
    config: MemoryConfig,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("storage", &self.storage.name())
            .field("config", &self.config)
            .finish()
    }
}

impl SessionStore {
    /// Load the snapshot once and build the store. Never fails: a missing snapshot
    /// starts empty, a corrupt one starts empty with a warning.
    pub async fn open(config: MemoryConfig, storage: Arc<dyn SessionStorage>) -> Self {
        let sessions = match storage.load().await {
            Ok(Some(snapshot)) => {
                info!(
                    storage = storage.name(),
                    sessions = snapshot.sessions.len(),
                    "loaded session snapshot"
                );
                snapshot.sessions
            }
            Ok(None) => HashMap::new(),
            Err(err) => {
                warn!(storage = storage.name(), error = %err, "ignoring unreadable session snapshot");
                HashMap::new()
            }
        };

        let live = sessions
            .iter()
            .map(|(id, session)| (id.clone(), Arc::new(Mutex::new(session.clone()))))
            .collect();

        Self {
            sessions: RwLock::new(live),
            persisted: Mutex::new(sessions),
            storage,
            config,
        }
    }

    /// Store backed by process memory only.
    pub async fn in_memory(config: MemoryConfig) -> Self {
        Self::open(config, Arc::new(InMemoryStorage::new())).await
    }

    /// Store backed by the JSON file at `config.storage_path`.
    pub async fn from_config(config: MemoryConfig) -> Self {
        let storage = Arc::new(FileStorage::new(config.storage_path.clone()));
        Self::open(config, storage).await
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fetch a session, creating it with default preferences on first use.
    pub async fn get_or_create(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Session, MarketMindError> {
        if session_id.trim().is_empty() {
            return Err(MarketMindError::InvalidArgument(
                "session id must not be empty".to_string(),
            ));
        }

        let handle = match self.handle(session_id).await {
            Some(handle) => handle,
            None => {
                let mut map = self.sessions.write().await;
                map.entry(session_id.to_string())
                    .or_insert_with(|| {
                        info!(session_id, "created session");
                        Arc::new(Mutex::new(Session::new(
                            session_id,
                            user_id.map(str::to_string),
                        )))
                    })
                    .clone()
            }
        };

        let snapshot = {
            let mut session = handle.lock().await;
            if session.user_id.is_none() {
                session.user_id = user_id.map(str::to_string);
            }
            session.touch();
            session.clone()
        };
        self.persist(snapshot.clone()).await;
        Ok(snapshot)
    }

    /// Current state of a session, if it exists.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let handle = self.handle(session_id).await?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    /// Append one message, trimming history and updating statistics.
    pub async fn add_message(
        &self,
        session_id: &str,
        message: Message,
    ) -> Result<(), MarketMindError> {
        let (max_history, max_queries) = self.limits();
        self.mutate(session_id, |session| {
            session.append_message(message, max_history, max_queries);
        })
        .await
    }

    /// Shallow-merge a partial update into the session's preferences.
    pub async fn update_preferences(
        &self,
        session_id: &str,
        update: PreferencesUpdate,
    ) -> Result<UserPreferences, MarketMindError> {
        self.mutate(session_id, |session| {
            session.preferences.merge(&update);
            session.preferences.clone()
        })
        .await
    }

    /// Count one access of `entity` (ticker, index, ...).
    pub async fn update_entity_access(
        &self,
        session_id: &str,
        entity: &str,
    ) -> Result<(), MarketMindError> {
        self.mutate(session_id, |session| session.stats.record_entity(entity))
            .await
    }

    /// Apply a finished query atomically: optional compaction, new messages, preferences.
    ///
    /// Returns whether the compaction was applied. A compaction computed against an
    /// older revision is dropped; the messages are appended either way.
    pub async fn commit_turn(
        &self,
        session_id: &str,
        turn: TurnCommit,
    ) -> Result<bool, MarketMindError> {
        let (max_history, max_queries) = self.limits();
        self.mutate(session_id, |session| {
            let compacted = match turn.compaction {
                Some(compaction) => apply_compaction(session, compaction),
                None => false,
            };
            for message in turn.messages {
                session.append_message(message, max_history, max_queries);
            }
            if let Some(update) = &turn.preferences {
                session.preferences.merge(update);
            }
            compacted
        })
        .await
    }

    /// Replace history with a compacted version if the session is unchanged since it was computed.
    pub async fn apply_compaction(
        &self,
        session_id: &str,
        compaction: PendingCompaction,
    ) -> Result<bool, MarketMindError> {
        self.mutate(session_id, |session| apply_compaction(session, compaction))
            .await
    }

    pub async fn export_session(&self, session_id: &str) -> Result<SessionExport, MarketMindError> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| MarketMindError::SessionNotFound(session_id.to_string()))?;
        Ok(SessionExport {
            version: SessionExport::VERSION,
            exported_at: Utc::now(),
            session,
        })
    }

    /// Restore an exported session, replacing any session with the same id.
    pub async fn import_session(&self, export: SessionExport) -> Result<(), MarketMindError> {
        if export.version > SessionExport::VERSION {
            return Err(MarketMindError::InvalidArgument(format!(
                "unsupported session export version {}",
                export.version
            )));
        }
        let mut incoming = export.session;
        if incoming.session_id.trim().is_empty() {
            return Err(MarketMindError::InvalidArgument(
                "exported session has no id".to_string(),
            ));
        }
        let (max_history, _) = self.limits();
        incoming.trim_history(max_history);

        let id = incoming.session_id.clone();
        let handle = {
            let mut map = self.sessions.write().await;
            map.entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(incoming.clone())))
                .clone()
        };
        let snapshot = {
            let mut session = handle.lock().await;
            let revision = session.revision.max(incoming.revision) + 1;
            *session = incoming;
            session.revision = revision;
            session.clone()
        };
        info!(session_id = %id, messages = snapshot.message_count(), "imported session");
        self.persist(snapshot).await;
        Ok(())
    }

    /// Remove a session entirely. Returns whether it existed.
    pub async fn clear_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            let mut persisted = self.persisted.lock().await;
            persisted.remove(session_id);
            self.flush(&persisted).await;
            info!(session_id, "cleared session");
        }
        removed
    }

    /// Remove sessions idle longer than the configured timeout. Busy sessions are skipped.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = i64::try_from(self.config.session_timeout_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);

        let mut removed = Vec::new();
        {
            let mut map = self.sessions.write().await;
            map.retain(|id, handle| match handle.try_lock() {
                Ok(session) if session.is_expired(now, timeout) => {
                    removed.push(id.clone());
                    false
                }
                _ => true,
            });
        }

        if !removed.is_empty() {
            let mut persisted = self.persisted.lock().await;
            for id in &removed {
                persisted.remove(id);
            }
            self.flush(&persisted).await;
            info!(count = removed.len(), "removed expired sessions");
        }
        removed.sort();
        removed
    }

    /// Run [`Self::cleanup_expired`] periodically until the store is dropped.
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("session store dropped; stopping cleanup task");
                    break;
                };
                store.cleanup_expired(Utc::now()).await;
            }
        })
    }

    fn limits(&self) -> (usize, usize) {
        (
            self.config.max_conversation_history.max(1),
            self.config.max_recent_queries,
        )
    }

    async fn handle(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn mutate<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, MarketMindError> {
        let handle = self
            .handle(session_id)
            .await
            .ok_or_else(|| MarketMindError::SessionNotFound(session_id.to_string()))?;
        let (result, snapshot) = {
            let mut session = handle.lock().await;
            let result = f(&mut session);
            session.touch();
            (result, session.clone())
        };
        self.persist(snapshot).await;
        Ok(result)
    }

    /// Record `session` in the durable snapshot unless a newer revision is already there.
    async fn persist(&self, session: Session) {
        let mut persisted = self.persisted.lock().await;
        if !self
            .sessions
            .read()
            .await
            .contains_key(&session.session_id)
        {
            return;
        }
        if persisted
            .get(&session.session_id)
            .is_some_and(|existing| existing.revision > session.revision)
        {
            return;
        }
        persisted.insert(session.session_id.clone(), session);
        self.flush(&persisted).await;
    }

    async fn flush(&self, sessions: &HashMap<String, Session>) {
        let snapshot = SessionSnapshot {
            sessions: sessions.clone(),
            last_saved_at: Some(Utc::now()),
        };
        if let Err(err) = self.storage.save(&snapshot).await {
            warn!(
                storage = self.storage.name(),
                error = %err,
                "failed to persist sessions; keeping in-memory state"
            );
        }
    }
}

fn apply_compaction(session: &mut Session, compaction: PendingCompaction) -> bool {
    if session.revision != compaction.base_revision {
        debug!(
            session_id = %session.session_id,
            expected = compaction.base_revision,
            actual = session.revision,
            "discarding stale compaction"
        );
        return false;
    }
    session.conversation_history = compaction.messages;
    session.stats.record_summarization(compaction.record);
    true
}

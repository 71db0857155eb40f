//! Durable snapshot backends.
//!
//! The store reads one [`SessionSnapshot`] at startup and overwrites it on
//! every mutation. Backends only move the blob.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::types::SessionSnapshot;
use crate::error::MarketMindError;

/// Uniform read/write contract for the session snapshot.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// `Ok(None)` when nothing was ever saved. Unreadable or corrupt data is an error.
    async fn load(&self) -> Result<Option<SessionSnapshot>, MarketMindError>;

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), MarketMindError>;
}

/// Process-local storage. Keeps the serialized blob so reloads exercise the codec.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    blob: Mutex<Option<String>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with raw contents (used to simulate corrupt snapshots).
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(raw.into())),
        }
    }

    pub async fn raw(&self) -> Option<String> {
        self.blob.lock().await.clone()
    }
}

#[async_trait]
impl SessionStorage for InMemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self) -> Result<Option<SessionSnapshot>, MarketMindError> {
        match self.blob.lock().await.as_deref() {
            None => Ok(None),
            Some(raw) => decode(raw).map(Some),
        }
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), MarketMindError> {
        let raw = encode(snapshot)?;
        *self.blob.lock().await = Some(raw);
        Ok(())
    }
}

/// JSON file storage. Writes go to a sibling temp file and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sessions.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SessionStorage for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self) -> Result<Option<SessionSnapshot>, MarketMindError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(MarketMindError::Persistence(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )))
            }
        };
        decode(&raw).map(Some)
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), MarketMindError> {
        let raw = encode(snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| persistence_io("create directory", parent, err))?;
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|err| persistence_io("write", &tmp, err))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| persistence_io("rename into", &self.path, err))?;
        Ok(())
    }
}

fn persistence_io(action: &str, path: &Path, err: std::io::Error) -> MarketMindError {
    MarketMindError::Persistence(format!("failed to {action} {}: {err}", path.display()))
}

fn encode(snapshot: &SessionSnapshot) -> Result<String, MarketMindError> {
    serde_json::to_string_pretty(snapshot)
        .map_err(|err| MarketMindError::Persistence(format!("failed to encode snapshot: {err}")))
}

fn decode(raw: &str) -> Result<SessionSnapshot, MarketMindError> {
    serde_json::from_str(raw)
        .map_err(|err| MarketMindError::Persistence(format!("corrupt session snapshot: {err}")))
}

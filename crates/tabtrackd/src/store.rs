//! Session persistence.
//!
//! The tracker keeps all state in memory and hands snapshots to a
//! [`SessionStore`]. Saves never block command processing: the actor
//! publishes the latest [`PersistedState`] on a watch channel and a writer
//! task drains it, so a burst of changes collapses into one write.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Store failures are logged by the writer and never reach the actor

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tabtrack_protocol::{PersistedState, ProtocolError};

/// Errors raised by a session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored state is unreadable: {0}")]
    Format(#[from] ProtocolError),
}

/// Durable home for tracker state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the last saved state, or `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<PersistedState>, StoreError>;

    /// Replaces the saved state.
    async fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Stores state as a pretty-printed JSON document.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash mid-write leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
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
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(PersistedState::from_json(&content)?))
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let json = state.to_json()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), "State saved");
        Ok(())
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// Keeps the last saved state in memory. Used when no state file is set.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `state`.
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    /// Returns a copy of the saved state.
    pub async fn snapshot(&self) -> Option<PersistedState> {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        Ok(self.snapshot().await)
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }
}

// ============================================================================
// Writer Task
// ============================================================================

/// Sending side of the writer task.
///
/// Dropping it lets the writer flush the last published state and exit;
/// [`Persister::finish`] does that and waits for the flush.
#[derive(Debug)]
pub struct Persister {
    latest: watch::Sender<Option<PersistedState>>,
    task: JoinHandle<()>,
}

impl Persister {
    /// Queues `state` for writing, replacing any state not yet written.
    pub fn publish(&self, state: PersistedState) {
        self.latest.send_replace(Some(state));
    }

    /// Publishes a final state and waits until the writer has drained.
    pub async fn finish(self, state: PersistedState) {
        let Self { latest, task } = self;
        latest.send_replace(Some(state));
        drop(latest);
        if let Err(e) = task.await {
            warn!(error = %e, "State writer task failed");
        }
    }
}

/// Spawns the writer task for `store`.
pub fn spawn_persister(store: Arc<dyn SessionStore>) -> Persister {
    let (latest, mut pending) = watch::channel::<Option<PersistedState>>(None);

    let task = tokio::spawn(async move {
        // `changed` still reports a value published just before the sender
        // was dropped, so the final state is always written.
        while pending.changed().await.is_ok() {
            let state = pending.borrow_and_update().clone();
            let Some(state) = state else { continue };
            if let Err(e) = store.save(&state).await {
                warn!(error = %e, "Failed to save tracker state");
            }
        }
        debug!("State writer stopped");
    });

    Persister { latest, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabtrack_core::{BrowsingSession, CreatedBy, EndReason, SessionId};

    fn sample_state(saved_at: u64) -> PersistedState {
        let mut closed = BrowsingSession::with_id(SessionId::new("s-old"), CreatedBy::User, 0);
        closed.close(EndReason::UserInitiated, 500);
        let current = BrowsingSession::with_id(SessionId::new("s-new"), CreatedBy::Automatic, 600);
        PersistedState::new(saved_at, Some(current), vec![closed])
    }

    #[tokio::test]
    async fn test_file_store_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_round_trip_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("state.json"));

        let state = sample_state(700);
        store.save(&state).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(state));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ nope").unwrap();

        let err = JsonFileStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Format(_)));
    }

    #[tokio::test]
    async fn test_persister_writes_final_state() {
        let store = Arc::new(MemoryStore::new());
        let persister = spawn_persister(store.clone());

        persister.publish(sample_state(1));
        persister.publish(sample_state(2));
        persister.finish(sample_state(3)).await;

        assert_eq!(store.snapshot().await.map(|s| s.saved_at), Some(3));
    }
}

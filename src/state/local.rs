//! Local file-based state storage backend.
//!
//! The snapshot lives in `.pipeform/state.json` next to the configuration.
//! Saves go through a temporary file and a rename; the lock file is created
//! with create-new semantics so two processes cannot both hold it.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{PipeformError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::StateSnapshot;

/// Default state directory name.
pub const STATE_DIR: &str = ".pipeform";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store under `.pipeform` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| PipeformError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Creates a store from a custom state file path.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Path to the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StateError::backend(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        match fs::read_to_string(&self.lock_path).await {
            Ok(content) => LockInfo::from_json(&content).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            }
            .into()),
        }
    }

    /// Creates the lock file, failing if it already exists.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        self.ensure_dir().await?;
        let content = lock_info.to_json()?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }
                .into());
            }
        };

        file.write_all(content.as_bytes()).await.map_err(|e| StateError::LockFailed {
            message: format!("Failed to write lock file: {e}"),
        })?;
        file.sync_all().await.map_err(|e| StateError::LockFailed {
            message: format!("Failed to sync lock file: {e}"),
        })?;

        Ok(true)
    }

    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            }
            .into()),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        info!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path)
            .await
            .map_err(|e| StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })?;

        let state: StateSnapshot =
            serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })?;

        Ok(Some(state))
    }

    async fn save(&self, state: &StateSnapshot) -> Result<()> {
        self.ensure_dir().await?;

        debug!(
            "Saving state serial {} to: {}",
            state.serial,
            self.state_path.display()
        );

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        let temp_path = self.state_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::backend(format!("Failed to create temp state file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::backend(format!("Failed to write state file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::backend(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::backend(format!("Failed to rename state file: {e}")))?;

        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.state_path.exists() {
            info!("Deleting state file: {}", self.state_path.display());
            fs::remove_file(&self.state_path)
                .await
                .map_err(|e| StateError::backend(format!("Failed to delete state file: {e}")))?;
        }

        self.delete_lock_file().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let lock_info = LockInfo::new(holder);

        if !self.create_lock_file(&lock_info).await? {
            match self.read_lock_file().await? {
                Some(existing) if !existing.is_expired() => {
                    return Err(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }
                    .into());
                }
                _ => {
                    debug!("Expired lock found, taking over");
                    self.delete_lock_file().await?;
                    if !self.create_lock_file(&lock_info).await? {
                        return Err(StateError::LockFailed {
                            message: String::from("Lock was taken concurrently"),
                        }
                        .into());
                    }
                }
            }
        }

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let current = self.read_lock_file().await?.ok_or_else(|| StateError::LockFailed {
            message: format!("lock {lock_id} is no longer held"),
        })?;
        let renewed = current.renewed(lock_id)?;

        let temp_path = self.lock_path.with_extension("renew");
        fs::write(&temp_path, renewed.to_json()?)
            .await
            .map_err(|e| StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })?;
        fs::rename(&temp_path, &self.lock_path)
            .await
            .map_err(|e| StateError::LockFailed {
                message: format!("Failed to replace lock file: {e}"),
            })?;

        debug!("Renewed state lock {lock_id} until {}", renewed.expires_at);
        Ok(renewed)
    }

    async fn force_unlock(&self) -> Result<()> {
        self.delete_lock_file().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceId, ResourceKind};
    use crate::state::RecordedResource;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path().join(STATE_DIR));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut state = StateSnapshot::new("dns-analytics", "dev");
        state.record(RecordedResource::new(
            &ResourceId::new(ResourceKind::Bucket, "results"),
            "bucket-results-1",
        ));
        store.save(&state).await.expect("Failed to save state");

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded, state);
        assert!(!store.state_path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();
        assert!(store.load().await.expect("Load should not fail").is_none());
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupted_state_is_reported() {
        let (store, _temp) = create_test_store();
        store.save(&StateSnapshot::new("p", "dev")).await.unwrap();
        std::fs::write(store.state_path(), "{ not json").unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, PipeformError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");
        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");
        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store.acquire_lock("holder-1").await.unwrap();
        let err = store.acquire_lock("holder-2").await.unwrap_err();
        match err {
            PipeformError::State(StateError::LockedByOther { holder, .. }) => {
                assert_eq!(holder, "holder-1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_expired_lock_taken_over() {
        let (store, _temp) = create_test_store();
        let mut stale = LockInfo::new("crashed");
        stale.expires_at = stale.acquired_at - chrono::Duration::seconds(1);
        assert!(store.create_lock_file(&stale).await.unwrap());

        let lock = store.acquire_lock("fresh").await.unwrap();
        assert_eq!(store.get_lock_info().await.unwrap().unwrap().lock_id, lock.lock_id);
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _temp) = create_test_store();
        let _lock = store.acquire_lock("a").await.unwrap();
        store.release_lock("not-the-id").await.unwrap();
        assert!(store.is_locked().await.unwrap());

        store.force_unlock().await.unwrap();
        assert!(!store.is_locked().await.unwrap());
    }
}

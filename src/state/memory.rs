//! In-memory state store, used by `--simulate` and tests.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

use crate::error::{PipeformError, Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::StateSnapshot;

#[derive(Debug, Default)]
struct Inner {
    snapshot: Option<StateSnapshot>,
    lock: Option<LockInfo>,
    saves: usize,
}

/// State store that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding a copy of `snapshot`.
    #[must_use]
    pub fn seeded(snapshot: Option<StateSnapshot>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                snapshot,
                ..Inner::default()
            }),
        }
    }

    /// Number of saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.inner.lock().map(|i| i.saves).unwrap_or_default()
    }

    /// Current snapshot, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<StateSnapshot> {
        self.inner.lock().ok().and_then(|i| i.snapshot.clone())
    }

    fn guard(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| PipeformError::State(StateError::backend("memory store lock poisoned")))
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        Ok(self.guard()?.snapshot.clone())
    }

    async fn save(&self, state: &StateSnapshot) -> Result<()> {
        let mut inner = self.guard()?;
        inner.snapshot = Some(state.clone());
        inner.saves += 1;
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let mut inner = self.guard()?;
        inner.snapshot = None;
        inner.lock = None;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.guard()?.snapshot.is_some())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut inner = self.guard()?;
        if let Some(existing) = inner.lock.as_ref().filter(|l| !l.is_expired()) {
            return Err(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }
            .into());
        }
        let lock = LockInfo::new(holder);
        inner.lock = Some(lock.clone());
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut inner = self.guard()?;
        if inner.lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            inner.lock = None;
        }
        Ok(())
    }

    async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let mut inner = self.guard()?;
        let current = inner.lock.take().ok_or_else(|| StateError::LockFailed {
            message: format!("lock {lock_id} is no longer held"),
        })?;
        match current.clone().renewed(lock_id) {
            Ok(renewed) => {
                inner.lock = Some(renewed.clone());
                Ok(renewed)
            }
            Err(e) => {
                inner.lock = Some(current);
                Err(e)
            }
        }
    }

    async fn force_unlock(&self) -> Result<()> {
        let mut inner = self.guard()?;
        inner.lock = None;
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.guard()?.lock.clone())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_exclusive() {
        let store = MemoryStateStore::new();
        let lock = store.acquire_lock("a").await.unwrap();
        assert!(store.acquire_lock("b").await.is_err());
        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(store.acquire_lock("b").await.is_ok());
    }

    #[tokio::test]
    async fn test_seeded_store_does_not_touch_source() {
        let store = MemoryStateStore::seeded(Some(StateSnapshot::new("p", "dev")));
        let mut loaded = store.load().await.unwrap().unwrap();
        loaded.bump_serial();
        store.save(&loaded).await.unwrap();
        assert_eq!(store.snapshot().unwrap().serial, 1);
        assert_eq!(store.save_count(), 1);
    }
}

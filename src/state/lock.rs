//! State lock records.
//!
//! A lock is held for the whole plan-and-apply of one run. Locks expire so a
//! crashed run does not block the next one forever; a live run renews its
//! lock well inside the expiry window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lock expiry duration in seconds, counted from acquisition or the last
/// renewal.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// How often a running apply renews its lock.
pub const LOCK_RENEW_SECS: u64 = 60;

/// Information about a state lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock held by `holder`, or by this process if empty.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder,
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }

    /// Renews this lock for `lock_id`, pushing expiry a full period out.
    ///
    /// Fails if the record belongs to another lock.
    pub(crate) fn renewed(mut self, lock_id: &str) -> crate::error::Result<Self> {
        if self.lock_id != lock_id {
            return Err(crate::error::StateError::LockFailed {
                message: format!("lock {lock_id} is no longer held; {} holds the state", self.holder),
            }
            .into());
        }
        self.expires_at = Utc::now() + chrono::Duration::seconds(LOCK_EXPIRY_SECS);
        Ok(self)
    }

    /// Serializes the lock record.
    pub(crate) fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            crate::error::StateError::serialization(format!("Failed to serialize lock: {e}")).into()
        })
    }

    /// Parses a lock record.
    pub(crate) fn from_json(content: &str) -> crate::error::Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            crate::error::StateError::Corrupted {
                message: format!("Failed to parse lock: {e}"),
            }
            .into()
        })
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(
        |_| String::from("unknown"),
        |h| h.to_string_lossy().to_string(),
    );

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_creation() {
        let lock = LockInfo::new("ci-runner");
        assert_eq!(lock.holder, "ci-runner");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
    }

    #[test]
    fn test_empty_holder_uses_process_id() {
        let lock = LockInfo::new("");
        assert!(lock.holder.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_holder_ids_unique() {
        assert_ne!(generate_holder_id(), generate_holder_id());
    }

    #[test]
    fn test_renew_extends_only_own_lock() {
        let mut lock = LockInfo::new("a");
        lock.expires_at = Utc::now() + chrono::Duration::seconds(5);
        let id = lock.lock_id.clone();

        let renewed = lock.clone().renewed(&id).unwrap();
        assert!(renewed.remaining_secs() > 5);
        assert_eq!(renewed.acquired_at, lock.acquired_at);
        assert!(lock.renewed("someone-else").is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let lock = LockInfo::new("a");
        let back = LockInfo::from_json(&lock.to_json().unwrap()).unwrap();
        assert_eq!(back, lock);
    }
}

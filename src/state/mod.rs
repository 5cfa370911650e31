//! State management for pipeform.
//!
//! Persistent storage of the State Snapshot (what was applied, with provider
//! identifiers and outputs) and of the lock that serializes runs.

mod local;
mod lock;
mod memory;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LOCK_RENEW_SECS, LockInfo, generate_holder_id};
pub use memory::MemoryStateStore;
pub use s3::{S3StateStore, load_aws_config};
pub use store::StateStore;
pub use types::{
    HistoryEntry, MAX_HISTORY, RecordedResource, ResourceStatus, RunOperation, STATE_VERSION,
    StateSnapshot,
};

//! Provider adapters.
//!
//! This module provides the abstract provider API and its implementations:
//! - An HTTP control-plane client
//! - An in-memory provider for simulation and tests
//! - A wrapper that uploads script artifacts to object storage
//! - Retry policy, secret lookup, and drift observation

mod artifacts;
mod client;
mod memory;
mod observer;
mod retry;
pub mod secrets;
mod types;

pub use artifacts::{ArtifactProvider, MemoryObjectStore, ObjectStore, S3ObjectStore};
pub use client::{DEFAULT_TIMEOUT_SECS, HttpProvider};
pub use memory::{Call, MemoryProvider, StoredResource};
pub use observer::{
    AttributeDrift, DriftReport, DriftedResource, ObservedState, Observation, ResourceObserver,
    compare,
};
pub use retry::{
    Attempted, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS, RetryPolicy,
};
pub use secrets::{
    EnvSecretStore, PlaceholderSecretStore, SecretStore, SecretString, StaticSecretStore,
};
pub use types::{Operation, Payload, Provider, ProviderResult};

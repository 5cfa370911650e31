//! S3-based state storage backend.
//!
//! The snapshot is written as one whole object, so readers see either the
//! previous or the new snapshot. The lock is created with a conditional put
//! (`If-None-Match: *`), which S3 rejects when the lock object exists.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use tracing::{debug, info};

use crate::error::{Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::StateSnapshot;

/// State file key suffix.
const STATE_KEY: &str = "state.json";

/// Lock file key suffix.
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
}

/// Loads the shared AWS configuration, optionally overriding the region.
pub async fn load_aws_config(region: Option<&str>) -> aws_config::SdkConfig {
    match region {
        Some(region) => {
            aws_config::from_env()
                .region(aws_config::Region::new(region.to_string()))
                .load()
                .await
        }
        None => aws_config::load_from_env().await,
    }
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

impl S3StateStore {
    /// Creates a new S3 state store.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = load_aws_config(region).await;
        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| StateError::backend(format!("Failed to read S3 object: {e}")))?;

                let content =
                    String::from_utf8(bytes.to_vec()).map_err(|e| StateError::Corrupted {
                        message: format!("Invalid UTF-8 in S3 object: {e}"),
                    })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StateError::backend(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StateError::backend(format!("S3 put error: {e}")))?;

        Ok(())
    }

    /// Puts an object only if none exists. Returns false if one does.
    async fn put_object_if_absent(&self, key: &str, content: &str) -> Result<bool> {
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .if_none_match("*")
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.code(), Some("PreconditionFailed" | "ConditionalRequestConflict")) => {
                Ok(false)
            }
            Err(e) => Err(StateError::LockFailed {
                message: format!("S3 conditional put error: {e}"),
            }
            .into()),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::backend(format!("S3 delete error: {e}")))?;

        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StateError::backend(format!("S3 head error: {service_err}")).into())
                }
            }
        }
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        let key = self.key(STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        let Some(json) = self.get_object(&key).await? else {
            debug!("No state found in S3");
            return Ok(None);
        };

        let state: StateSnapshot = serde_json::from_str(&json).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse state: {e}"),
        })?;

        info!(
            "Loaded state for project: {}/{} (serial {})",
            state.project, state.environment, state.serial
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &StateSnapshot) -> Result<()> {
        let key = self.key(STATE_KEY);
        debug!("Saving state serial {} to s3://{}/{key}", state.serial, self.bucket);

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        self.put_object(&key, &content).await
    }

    async fn delete(&self) -> Result<()> {
        let state_key = self.key(STATE_KEY);
        let lock_key = self.key(LOCK_KEY);

        info!("Deleting state from s3://{}/{state_key}", self.bucket);

        self.delete_object(&state_key).await?;
        self.delete_object(&lock_key).await
    }

    async fn exists(&self) -> Result<bool> {
        self.object_exists(&self.key(STATE_KEY)).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let key = self.key(LOCK_KEY);
        let lock_info = LockInfo::new(holder);
        let content = lock_info.to_json()?;

        if !self.put_object_if_absent(&key, &content).await? {
            let existing = match self.get_object(&key).await? {
                Some(json) => Some(LockInfo::from_json(&json)?),
                None => None,
            };

            match existing {
                Some(existing) if !existing.is_expired() => {
                    return Err(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }
                    .into());
                }
                _ => {
                    debug!("Expired lock found, taking over");
                    self.delete_object(&key).await?;
                    if !self.put_object_if_absent(&key, &content).await? {
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
        let key = self.key(LOCK_KEY);

        if let Some(content) = self.get_object(&key).await? {
            let existing = LockInfo::from_json(&content)?;

            if existing.lock_id == lock_id {
                self.delete_object(&key).await?;
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
        let key = self.key(LOCK_KEY);
        let content = self.get_object(&key).await?.ok_or_else(|| StateError::LockFailed {
            message: format!("lock {lock_id} is no longer held"),
        })?;
        let renewed = LockInfo::from_json(&content)?.renewed(lock_id)?;
        self.put_object(&key, &renewed.to_json()?).await?;

        debug!("Renewed state lock {lock_id} until {}", renewed.expires_at);
        Ok(renewed)
    }

    async fn force_unlock(&self) -> Result<()> {
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        match self.get_object(&self.key(LOCK_KEY)).await? {
            Some(content) => LockInfo::from_json(&content).map(Some),
            None => Ok(None),
        }
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("pipeform/dev")), "pipeform/dev/");
        assert_eq!(normalize_prefix(Some("/pipeform/dev/")), "pipeform/dev/");
    }
}

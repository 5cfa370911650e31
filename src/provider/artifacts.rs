//! Script artifact uploads.
//!
//! Script artifacts are opaque files copied byte-for-byte into a bucket.
//! [`ArtifactProvider`] wraps another provider: for `script_artifact`
//! resources it uploads the file to the object store before recording the
//! resource with the inner provider, and removes the object on delete. Every
//! other kind passes straight through.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::config::{ConfigHasher, resolve_source_path};
use crate::error::ProviderError;
use crate::model::{Outputs, ResourceId, ResourceKind};

use super::types::{Payload, Provider, ProviderResult};

/// Content type used for uploaded scripts.
const SCRIPT_CONTENT_TYPE: &str = "application/octet-stream";

/// Minimal object storage interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Writes an object, replacing any existing one.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> ProviderResult<()>;

    /// Deletes an object. Deleting a missing object succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> ProviderResult<()>;
}

/// Object store backed by AWS S3.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Creates a store from the ambient AWS configuration.
    pub async fn new(region: Option<&str>) -> Self {
        let config = crate::state::load_aws_config(region).await;
        Self {
            client: Client::new(&config),
        }
    }

    /// Creates a store with an existing client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> ProviderResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(bytes.into())
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                s3_error("put", status, e.code(), DisplayErrorContext(&e))
            })?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> ProviderResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                s3_error("delete", status, e.code(), DisplayErrorContext(&e))
            })?;
        Ok(())
    }
}

/// Classifies an S3 failure. Authorization failures and other client errors
/// are permanent; throttling, timeouts, 5xx and transport failures are
/// retried.
fn s3_error(
    operation: &str,
    status: Option<u16>,
    code: Option<&str>,
    detail: impl std::fmt::Display,
) -> ProviderError {
    let message = format!("S3 {operation} error: {detail}");
    match (status, code) {
        (
            _,
            Some(
                "AccessDenied" | "AllAccessDisabled" | "AccountProblem" | "InvalidAccessKeyId"
                | "SignatureDoesNotMatch" | "ExpiredToken" | "InvalidToken",
            ),
        )
        | (Some(401 | 403), _) => ProviderError::PermissionDenied { message },
        (_, Some("SlowDown" | "RequestTimeout")) | (Some(408 | 429), _) => {
            ProviderError::network(message)
        }
        (Some(400..=499), _) => ProviderError::Rejected { message },
        (Some(code @ 500..=599), _) => ProviderError::Unavailable {
            status: code,
            message,
        },
        _ => ProviderError::network(message),
    }
}

/// Object store kept in memory, used by `--simulate`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bytes stored under `bucket/key`.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|o| o.get(&(bucket.to_string(), key.to_string())).cloned())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> ProviderResult<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| ProviderError::network("object store lock poisoned"))?;
        objects.insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> ProviderResult<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| ProviderError::network("object store lock poisoned"))?;
        objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// Provider wrapper that uploads script artifacts.
#[derive(Debug)]
pub struct ArtifactProvider<P> {
    inner: P,
    store: Arc<dyn ObjectStore>,
    base_dir: PathBuf,
}

impl<P: Provider> ArtifactProvider<P> {
    /// Wraps `inner`. Artifact sources resolve against `base_dir`.
    pub fn new(inner: P, store: Arc<dyn ObjectStore>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            store,
            base_dir: base_dir.into(),
        }
    }

    fn location(payload: &Payload) -> ProviderResult<(String, String)> {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ProviderError::rejected(format!("script_artifact requires '{name}'")))
        };
        Ok((field("bucket")?, field("key")?))
    }

    /// Reads the source, checks it against the planned hash and uploads it.
    async fn upload(&self, resource: &ResourceId, payload: &Payload) -> ProviderResult<Outputs> {
        let (bucket, key) = Self::location(payload)?;
        let source = payload
            .get("source")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ProviderError::rejected("script_artifact requires 'source'"))?;
        let path = resolve_source_path(&self.base_dir, source);

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            ProviderError::rejected(format!("cannot read {}: {e}", path.display()))
        })?;
        let hash = ConfigHasher::hash_bytes(&bytes);

        if let Some(planned) = payload.get("content_hash").and_then(serde_json::Value::as_str)
            && planned != hash
        {
            return Err(ProviderError::rejected(format!(
                "{} changed since the plan was made",
                path.display()
            )));
        }

        info!(
            "Uploading {resource} to s3://{bucket}/{key} ({} bytes)",
            bytes.len()
        );
        self.store
            .put(&bucket, &key, bytes, SCRIPT_CONTENT_TYPE)
            .await?;

        Ok(Outputs::from([
            (String::from("location"), format!("s3://{bucket}/{key}")),
            (String::from("content_hash"), hash),
        ]))
    }
}

#[async_trait]
impl<P: Provider> Provider for ArtifactProvider<P> {
    async fn create(&self, resource: &ResourceId, attributes: &Payload) -> ProviderResult<Outputs> {
        if resource.kind != ResourceKind::ScriptArtifact {
            return self.inner.create(resource, attributes).await;
        }
        let uploaded = self.upload(resource, attributes).await?;
        let mut outputs = self.inner.create(resource, attributes).await?;
        outputs.extend(uploaded);
        Ok(outputs)
    }

    async fn get(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<Payload> {
        self.inner.get(resource, provider_id).await
    }

    async fn update(
        &self,
        resource: &ResourceId,
        provider_id: &str,
        attributes: &Payload,
    ) -> ProviderResult<Outputs> {
        if resource.kind != ResourceKind::ScriptArtifact {
            return self.inner.update(resource, provider_id, attributes).await;
        }
        let uploaded = self.upload(resource, attributes).await?;
        let mut outputs = self.inner.update(resource, provider_id, attributes).await?;
        outputs.extend(uploaded);
        Ok(outputs)
    }

    async fn delete(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<()> {
        if resource.kind == ResourceKind::ScriptArtifact {
            match self.inner.get(resource, provider_id).await {
                Ok(current) => {
                    let (bucket, key) = Self::location(&current)?;
                    debug!("Removing s3://{bucket}/{key}");
                    self.store.delete(&bucket, &key).await?;
                }
                Err(ProviderError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.inner.delete(resource, provider_id).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;
    use tempfile::TempDir;

    fn artifact() -> ResourceId {
        ResourceId::new(ResourceKind::ScriptArtifact, "create_csv")
    }

    fn payload(hash: Option<&str>) -> Payload {
        let mut p = Payload::new();
        p.insert("bucket".into(), "scripts".into());
        p.insert("key".into(), "glue/create_csv.py".into());
        p.insert("source".into(), "create_csv.py".into());
        if let Some(h) = hash {
            p.insert("content_hash".into(), h.into());
        }
        p
    }

    fn workspace(content: &[u8]) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("create_csv.py"), content).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_create_uploads_verbatim_bytes() {
        let content = b"import sys\r\nprint(sys.argv)\n";
        let dir = workspace(content);
        let expected = content.to_vec();

        let mut store = MockObjectStore::new();
        store
            .expect_put()
            .withf(move |bucket, key, bytes, _| {
                bucket == "scripts" && key == "glue/create_csv.py" && *bytes == expected
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let provider = ArtifactProvider::new(MemoryProvider::new(), Arc::new(store), dir.path());
        let hash = ConfigHasher::hash_bytes(content);
        let outputs = provider
            .create(&artifact(), &payload(Some(&hash)))
            .await
            .unwrap();

        assert_eq!(outputs["location"], "s3://scripts/glue/create_csv.py");
        assert_eq!(outputs["content_hash"], hash);
        assert!(outputs.contains_key("id"));
    }

    #[tokio::test]
    async fn test_changed_source_rejected_without_upload() {
        let dir = workspace(b"print('new')\n");
        let mut store = MockObjectStore::new();
        store.expect_put().never();

        let provider = ArtifactProvider::new(MemoryProvider::new(), Arc::new(store), dir.path());
        let stale = ConfigHasher::hash_bytes(b"print('old')\n");
        let err = provider
            .create(&artifact(), &payload(Some(&stale)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_object() {
        let dir = workspace(b"x");
        let store = Arc::new(MemoryObjectStore::new());
        let provider = ArtifactProvider::new(MemoryProvider::new(), store.clone(), dir.path());

        let outputs = provider.create(&artifact(), &payload(None)).await.unwrap();
        assert_eq!(
            store.object("scripts", "glue/create_csv.py"),
            Some(b"x".to_vec())
        );

        provider.delete(&artifact(), &outputs["id"]).await.unwrap();
        assert!(store.object("scripts", "glue/create_csv.py").is_none());
    }

    #[test]
    fn test_s3_errors_classified() {
        let denied = s3_error("put", Some(403), Some("AccessDenied"), "denied");
        assert!(matches!(denied, ProviderError::PermissionDenied { .. }));
        assert!(!denied.is_transient());

        let missing_bucket = s3_error("put", Some(404), Some("NoSuchBucket"), "no bucket");
        assert!(matches!(missing_bucket, ProviderError::Rejected { .. }));
        assert!(!missing_bucket.is_transient());

        assert!(s3_error("put", Some(503), Some("SlowDown"), "slow").is_transient());
        assert!(s3_error("put", Some(500), Some("InternalError"), "oops").is_transient());
        assert!(s3_error("delete", None, None, "dispatch failure").is_transient());
    }

    #[tokio::test]
    async fn test_other_kinds_pass_through() {
        let mut store = MockObjectStore::new();
        store.expect_put().never();
        let provider = ArtifactProvider::new(MemoryProvider::new(), Arc::new(store), ".");

        let mut p = Payload::new();
        p.insert("name".into(), "dns-results".into());
        let outputs = provider
            .create(&ResourceId::new(ResourceKind::Bucket, "results"), &p)
            .await
            .unwrap();
        assert_eq!(outputs["name"], "dns-results");
    }
}

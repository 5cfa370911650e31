//! In-process provider.
//!
//! Used by `--simulate` and by tests. Identifiers are `kind-name-N` and arns
//! are `arn:pipeform:{kind}:::{name}`. Faults can be scripted per resource and
//! operation; each scripted fault is consumed by one call.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;

use crate::error::ProviderError;
use crate::model::{Outputs, ResourceId};
use crate::state::StateSnapshot;

use super::types::{Operation, Payload, Provider, ProviderResult};

/// A resource held by the memory provider.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResource {
    /// Resource identity.
    pub resource: ResourceId,
    /// Last written attributes.
    pub attributes: Payload,
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation performed.
    pub operation: Operation,
    /// Target resource.
    pub resource: ResourceId,
}

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<String, StoredResource>,
    next_serial: u64,
    faults: BTreeMap<(Operation, ResourceId), VecDeque<ProviderError>>,
    calls: Vec<Call>,
}

/// In-memory provider with fault injection.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
}

impl MemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider holding every resource recorded in a snapshot.
    #[must_use]
    pub fn seeded(snapshot: &StateSnapshot) -> Self {
        let provider = Self::new();
        if let Ok(mut inner) = provider.inner.lock() {
            for (id, recorded) in &snapshot.resources {
                let attributes = recorded
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                inner.resources.insert(
                    recorded.provider_id.clone(),
                    StoredResource {
                        resource: id.clone(),
                        attributes,
                    },
                );
            }
            inner.next_serial = inner
                .resources
                .keys()
                .filter_map(|id| id.rsplit('-').next().and_then(|n| n.parse::<u64>().ok()))
                .max()
                .unwrap_or_default();
        }
        provider
    }

    /// Scripts `error` to be returned by the next `times` calls of `operation`
    /// on `resource`.
    pub fn fail(&self, operation: Operation, resource: &ResourceId, error: ProviderError, times: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            let queue = inner
                .faults
                .entry((operation, resource.clone()))
                .or_default();
            queue.extend(std::iter::repeat_n(error, times));
        }
    }

    /// Returns every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().map(|i| i.calls.clone()).unwrap_or_default()
    }

    /// Returns the stored resource with the given provider id.
    #[must_use]
    pub fn resource(&self, provider_id: &str) -> Option<StoredResource> {
        self.inner
            .lock()
            .ok()
            .and_then(|i| i.resources.get(provider_id).cloned())
    }

    /// Number of resources currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.resources.len()).unwrap_or_default()
    }

    /// Returns true if no resources are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes a resource out of band, as if deleted outside pipeform.
    pub fn forget(&self, provider_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.resources.remove(provider_id);
        }
    }

    /// Overwrites one attribute out of band.
    pub fn tamper(&self, provider_id: &str, key: &str, value: serde_json::Value) {
        if let Ok(mut inner) = self.inner.lock()
            && let Some(stored) = inner.resources.get_mut(provider_id)
        {
            stored.attributes.insert(key.to_string(), value);
        }
    }

    fn lock(&self) -> ProviderResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| ProviderError::network("memory provider lock poisoned"))
    }

    fn begin(inner: &mut Inner, operation: Operation, resource: &ResourceId) -> ProviderResult<()> {
        inner.calls.push(Call {
            operation,
            resource: resource.clone(),
        });
        let key = (operation, resource.clone());
        if let Some(error) = inner.faults.get_mut(&key).and_then(VecDeque::pop_front) {
            debug!("Injected fault for {operation} {resource}: {error}");
            return Err(error);
        }
        Ok(())
    }

    fn outputs(resource: &ResourceId, provider_id: &str, attributes: &Payload) -> Outputs {
        let name = attributes
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(&resource.name)
            .to_string();
        Outputs::from([
            (String::from("id"), provider_id.to_string()),
            (
                String::from("arn"),
                format!("arn:pipeform:{}:::{name}", resource.kind),
            ),
            (String::from("name"), name),
        ])
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn create(&self, resource: &ResourceId, attributes: &Payload) -> ProviderResult<Outputs> {
        let mut inner = self.lock()?;
        Self::begin(&mut inner, Operation::Create, resource)?;

        inner.next_serial += 1;
        let provider_id = format!("{}-{}-{}", resource.kind, resource.name, inner.next_serial);
        inner.resources.insert(
            provider_id.clone(),
            StoredResource {
                resource: resource.clone(),
                attributes: attributes.clone(),
            },
        );
        Ok(Self::outputs(resource, &provider_id, attributes))
    }

    async fn get(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<Payload> {
        let mut inner = self.lock()?;
        Self::begin(&mut inner, Operation::Get, resource)?;
        inner
            .resources
            .get(provider_id)
            .map(|r| r.attributes.clone())
            .ok_or_else(|| ProviderError::NotFound {
                kind: resource.kind.to_string(),
                id: provider_id.to_string(),
            })
    }

    async fn update(
        &self,
        resource: &ResourceId,
        provider_id: &str,
        attributes: &Payload,
    ) -> ProviderResult<Outputs> {
        let mut inner = self.lock()?;
        Self::begin(&mut inner, Operation::Update, resource)?;
        let stored = inner
            .resources
            .get_mut(provider_id)
            .ok_or_else(|| ProviderError::NotYetConsistent {
                message: format!("{resource} ({provider_id}) not visible"),
            })?;
        stored.attributes = attributes.clone();
        Ok(Self::outputs(resource, provider_id, attributes))
    }

    async fn delete(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<()> {
        let mut inner = self.lock()?;
        Self::begin(&mut inner, Operation::Delete, resource)?;
        inner
            .resources
            .remove(provider_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound {
                kind: resource.kind.to_string(),
                id: provider_id.to_string(),
            })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;

    fn bucket() -> ResourceId {
        ResourceId::new(ResourceKind::Bucket, "results")
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let provider = MemoryProvider::new();
        let outputs = provider.create(&bucket(), &Payload::new()).await.unwrap();
        assert_eq!(outputs["id"], "bucket-results-1");
        assert_eq!(outputs["arn"], "arn:pipeform:bucket:::results");

        assert!(provider.get(&bucket(), "bucket-results-1").await.is_ok());
        provider.delete(&bucket(), "bucket-results-1").await.unwrap();
        assert!(matches!(
            provider.delete(&bucket(), "bucket-results-1").await,
            Err(ProviderError::NotFound { .. })
        ));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_faults_are_consumed() {
        let provider = MemoryProvider::new();
        provider.fail(
            Operation::Create,
            &bucket(),
            ProviderError::RateLimited { retry_after_ms: 0 },
            2,
        );

        assert!(provider.create(&bucket(), &Payload::new()).await.is_err());
        assert!(provider.create(&bucket(), &Payload::new()).await.is_err());
        assert!(provider.create(&bucket(), &Payload::new()).await.is_ok());
        assert_eq!(provider.calls().len(), 3);
    }
}

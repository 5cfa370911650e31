//! Provider trait and wire types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::model::{Outputs, ResourceId};

/// Result of a provider call.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Attribute payload sent to or read from the provider.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Abstract provider API, one call per resource step.
///
/// The resource id carries the kind and logical name. `provider_id` is the
/// identifier the provider assigned on create.
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// Creates a resource and returns its outputs.
    async fn create(&self, resource: &ResourceId, attributes: &Payload) -> ProviderResult<Outputs>;

    /// Reads a resource's current attributes.
    async fn get(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<Payload>;

    /// Updates a resource in place and returns its outputs.
    async fn update(
        &self,
        resource: &ResourceId,
        provider_id: &str,
        attributes: &Payload,
    ) -> ProviderResult<Outputs>;

    /// Deletes a resource.
    async fn delete(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<()>;

    /// Returns a short name for logs.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for Arc<P> {
    async fn create(&self, resource: &ResourceId, attributes: &Payload) -> ProviderResult<Outputs> {
        (**self).create(resource, attributes).await
    }

    async fn get(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<Payload> {
        (**self).get(resource, provider_id).await
    }

    async fn update(
        &self,
        resource: &ResourceId,
        provider_id: &str,
        attributes: &Payload,
    ) -> ProviderResult<Outputs> {
        (**self).update(resource, provider_id, attributes).await
    }

    async fn delete(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<()> {
        (**self).delete(resource, provider_id).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Provider operation, used in logs and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Create.
    Create,
    /// Read.
    Get,
    /// Update.
    Update,
    /// Delete.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Get => "get",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Request body for create and update.
#[derive(Debug, Serialize)]
pub(crate) struct AttributesRequest<'a> {
    pub(crate) attributes: &'a Payload,
}

/// Response body for create and update.
#[derive(Debug, Deserialize)]
pub(crate) struct OutputsResponse {
    #[serde(default)]
    pub(crate) outputs: BTreeMap<String, serde_json::Value>,
}

/// Response body for get.
#[derive(Debug, Deserialize)]
pub(crate) struct AttributesResponse {
    #[serde(default)]
    pub(crate) attributes: Payload,
}

/// Error body returned by the control plane.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) partial_outputs: Option<BTreeMap<String, serde_json::Value>>,
}

/// Flattens JSON output values to strings.
pub(crate) fn stringify_outputs(raw: BTreeMap<String, serde_json::Value>) -> Outputs {
    raw.into_iter()
        .map(|(k, v)| {
            let s = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, s)
        })
        .collect()
}

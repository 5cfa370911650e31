//! HTTP control-plane provider.
//!
//! Speaks a small JSON protocol: `POST /v1/{kind}` to create,
//! `GET|PUT|DELETE /v1/{kind}/{id}` to read, update and delete. Status codes
//! are mapped onto [`ProviderError`] so the executor can tell transient
//! failures from permanent ones.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::ProviderError;
use crate::model::{Outputs, ResourceId};

use super::secrets::SecretString;
use super::types::{
    AttributesRequest, AttributesResponse, ErrorResponse, Operation, OutputsResponse, Payload,
    Provider, ProviderResult, stringify_outputs,
};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fallback delay when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Provider backed by the HTTP control plane.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base endpoint, without trailing slash.
    endpoint: String,
    /// Bearer token.
    token: Option<SecretString>,
}

impl HttpProvider {
    /// Creates a new provider client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        endpoint: &str,
        token: Option<SecretString>,
        timeout_secs: u64,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn collection_url(&self, resource: &ResourceId) -> String {
        format!("{}/v1/{}", self.endpoint, resource.kind)
    }

    fn item_url(&self, resource: &ResourceId, provider_id: &str) -> String {
        format!("{}/v1/{}/{provider_id}", self.endpoint, resource.kind)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(header::CONTENT_TYPE, "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose()),
            None => builder,
        }
    }

    async fn send(
        &self,
        op: Operation,
        resource: &ResourceId,
        provider_id: Option<&str>,
        builder: RequestBuilder,
    ) -> ProviderResult<Response> {
        trace!("{op} {resource}");

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        debug!("{op} {resource} returned {status}");
        Err(map_status(
            op,
            resource,
            provider_id.unwrap_or_default(),
            status,
            retry_after,
            &body,
        ))
    }

    async fn outputs(response: Response) -> ProviderResult<Outputs> {
        let parsed: OutputsResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            }
        })?;
        Ok(stringify_outputs(parsed.outputs))
    }
}

/// Maps a non-success status to a provider error.
pub(crate) fn map_status(
    op: Operation,
    resource: &ResourceId,
    provider_id: &str,
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> ProviderError {
    let parsed: ErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| if body.is_empty() { status.to_string() } else { body.to_string() });

    match status.as_u16() {
        429 => ProviderError::RateLimited {
            retry_after_ms: retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS) * 1000,
        },
        404 if matches!(op, Operation::Get | Operation::Delete) => ProviderError::NotFound {
            kind: resource.kind.to_string(),
            id: provider_id.to_string(),
        },
        404 | 409 => ProviderError::NotYetConsistent { message },
        401 | 403 => ProviderError::PermissionDenied { message },
        400 | 422 => match parsed.partial_outputs {
            Some(outputs) => ProviderError::PartiallyApplied {
                message,
                outputs: stringify_outputs(outputs),
            },
            None => ProviderError::Rejected { message },
        },
        code if code >= 500 => ProviderError::Unavailable {
            status: code,
            message,
        },
        code => ProviderError::InvalidResponse {
            message: format!("unexpected status {code}: {message}"),
        },
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(&self, resource: &ResourceId, attributes: &Payload) -> ProviderResult<Outputs> {
        let builder = self
            .request(Method::POST, &self.collection_url(resource))
            .json(&AttributesRequest { attributes });
        let response = self.send(Operation::Create, resource, None, builder).await?;
        Self::outputs(response).await
    }

    async fn get(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<Payload> {
        let builder = self.request(Method::GET, &self.item_url(resource, provider_id));
        let response = self
            .send(Operation::Get, resource, Some(provider_id), builder)
            .await?;
        let parsed: AttributesResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    message: format!("Failed to parse response: {e}"),
                })?;
        Ok(parsed.attributes)
    }

    async fn update(
        &self,
        resource: &ResourceId,
        provider_id: &str,
        attributes: &Payload,
    ) -> ProviderResult<Outputs> {
        let builder = self
            .request(Method::PUT, &self.item_url(resource, provider_id))
            .json(&AttributesRequest { attributes });
        let response = self
            .send(Operation::Update, resource, Some(provider_id), builder)
            .await?;
        Self::outputs(response).await
    }

    async fn delete(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<()> {
        let builder = self.request(Method::DELETE, &self.item_url(resource, provider_id));
        self.send(Operation::Delete, resource, Some(provider_id), builder)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn workgroup() -> ResourceId {
        ResourceId::new(ResourceKind::Workgroup, "primary")
    }

    fn payload() -> Payload {
        let mut p = Payload::new();
        p.insert(String::from("name"), serde_json::json!("primary"));
        p
    }

    async fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(&server.uri(), Some(SecretString::new("tok")), 5).unwrap()
    }

    #[tokio::test]
    async fn test_create_posts_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/workgroup"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(serde_json::json!({"attributes": {"name": "primary"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "outputs": {"id": "wg-1", "arn": "arn:wg/primary", "name": "primary"}
            })))
            .mount(&server)
            .await;

        let outputs = provider(&server).await.create(&workgroup(), &payload()).await.unwrap();
        assert_eq!(outputs["id"], "wg-1");
    }

    #[tokio::test]
    async fn test_rate_limit_maps_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let err = provider(&server).await.create(&workgroup(), &payload()).await.unwrap_err();
        assert_eq!(err, ProviderError::RateLimited { retry_after_ms: 3000 });
    }

    #[tokio::test]
    async fn test_not_found_depends_on_operation() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let p = provider(&server).await;
        assert!(matches!(
            p.delete(&workgroup(), "wg-1").await,
            Err(ProviderError::NotFound { .. })
        ));
        assert!(matches!(
            p.update(&workgroup(), "wg-1", &payload()).await,
            Err(ProviderError::NotYetConsistent { .. })
        ));
    }

    #[tokio::test]
    async fn test_partial_outputs_on_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "message": "schedule invalid",
                "partial_outputs": {"id": "trg-9"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server).await.create(&workgroup(), &payload()).await.unwrap_err();
        assert_eq!(err.partial_outputs().unwrap()["id"], "trg-9");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_status_mapping_table() {
        let id = workgroup();
        let map = |code: u16| {
            map_status(
                Operation::Create,
                &id,
                "",
                StatusCode::from_u16(code).unwrap(),
                None,
                "",
            )
        };
        assert!(matches!(map(401), ProviderError::PermissionDenied { .. }));
        assert!(matches!(map(403), ProviderError::PermissionDenied { .. }));
        assert!(matches!(map(400), ProviderError::Rejected { .. }));
        assert!(matches!(map(409), ProviderError::NotYetConsistent { .. }));
        assert!(matches!(map(503), ProviderError::Unavailable { status: 503, .. }));
        assert_eq!(map(429), ProviderError::RateLimited { retry_after_ms: 1000 });
    }
}

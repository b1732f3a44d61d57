//! n8n REST API client.
//!
//! Fetches workflow definitions from a remote n8n instance through its
//! public API. Each call makes a single attempt; retries belong to the
//! orchestrator.

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{CompareError, ConfigError, FetchError, Result};
use crate::graph::WorkflowGraph;

use super::adapter::ProviderAdapter;

/// Header carrying the API key.
const API_KEY_HEADER: &str = "X-N8N-API-KEY";

/// Page size for workflow listing.
const PAGE_LIMIT: u32 = 250;

/// Upper bound on listing pages followed.
const MAX_PAGES: usize = 1000;

/// Default wait when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// n8n API client.
#[derive(Debug, Clone)]
pub struct N8nClient {
    /// HTTP client.
    client: Client,
    /// Workflows collection URL (`<base>/api/v1/workflows`).
    workflows_url: Url,
    /// API key.
    api_key: String,
}

/// One page of the workflow listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowPage {
    #[serde(default)]
    data: Vec<WorkflowSummary>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkflowSummary {
    id: serde_json::Value,
}

impl N8nClient {
    /// Creates a new n8n API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be created.
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let invalid = |message: String| ConfigError::ValidationError {
            message,
            field: Some(String::from("base_url")),
        };

        let mut workflows_url =
            Url::parse(base_url).map_err(|e| invalid(format!("Invalid n8n base URL '{base_url}': {e}")))?;
        workflows_url
            .path_segments_mut()
            .map_err(|()| invalid(format!("n8n base URL '{base_url}' cannot carry a path")))?
            .pop_if_empty()
            .extend(["api", "v1", "workflows"]);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CompareError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            workflows_url,
            api_key: api_key.to_string(),
        })
    }

    /// URL of one workflow, with the id percent-encoded as a path segment.
    fn workflow_url(&self, workflow_id: &str) -> Url {
        let mut url = self.workflows_url.clone();
        // Checked in `new`
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(workflow_id);
        }
        url
    }

    /// Sends a GET request and maps transport failures.
    async fn get(
        &self,
        env_id: &str,
        url: Url,
        query: &[(&str, &str)],
    ) -> std::result::Result<Response, FetchError> {
        trace!("GET {url} {query:?}");

        self.client
            .get(url)
            .query(query)
            .header(API_KEY_HEADER, &self.api_key)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::unreachable(env_id, format!("Request failed: {e}")))
    }

    /// Maps non-success statuses to fetch errors.
    async fn check_status(env_id: &str, response: Response) -> std::result::Result<Response, FetchError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

            return Err(FetchError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::AuthenticationFailed {
                env_id: env_id.to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::api_error(status.as_u16(), body));
        }

        Ok(response)
    }
}

/// Renders a JSON id (string or number) as a string.
fn id_string(id: &serde_json::Value) -> Option<String> {
    match id {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decodes a workflow document, mapping failures to fetch errors.
pub(super) fn decode_workflow(
    document: serde_json::Value,
    workflow_id: &str,
) -> std::result::Result<WorkflowGraph, FetchError> {
    WorkflowGraph::from_document(document, workflow_id).map_err(|e| FetchError::InvalidResponse {
        message: format!("Failed to decode workflow {workflow_id}: {e}"),
    })
}

#[async_trait]
impl ProviderAdapter for N8nClient {
    async fn fetch_workflow(
        &self,
        env_id: &str,
        workflow_id: &str,
    ) -> std::result::Result<Option<WorkflowGraph>, FetchError> {
        let response = self.get(env_id, self.workflow_url(workflow_id), &[]).await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Workflow {workflow_id} not found in {env_id}");
            return Ok(None);
        }

        let response = Self::check_status(env_id, response).await?;
        let document: serde_json::Value = response.json().await.map_err(|e| FetchError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })?;

        decode_workflow(document, workflow_id).map(Some)
    }

    async fn list_workflows(&self, env_id: &str) -> std::result::Result<Vec<String>, FetchError> {
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;

        let limit = PAGE_LIMIT.to_string();
        for _ in 0..MAX_PAGES {
            let mut query = vec![("limit", limit.as_str())];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.as_str()));
            }

            let response = self.get(env_id, self.workflows_url.clone(), &query).await?;
            let response = Self::check_status(env_id, response).await?;
            let page: WorkflowPage = response.json().await.map_err(|e| FetchError::InvalidResponse {
                message: format!("Failed to parse workflow listing: {e}"),
            })?;

            ids.extend(page.data.iter().filter_map(|w| id_string(&w.id)));

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => {
                    debug!("Listed {} workflows in {env_id}", ids.len());
                    return Ok(ids);
                }
            }
        }

        Err(FetchError::InvalidResponse {
            message: format!("Workflow listing in {env_id} exceeded {MAX_PAGES} pages"),
        })
    }

    fn provider_type(&self) -> &'static str {
        "n8n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> N8nClient {
        N8nClient::new(&server.uri(), "secret-key", 5).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_workflow() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/wf-1"))
            .and(header_eq(API_KEY_HEADER, "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "wf-1",
                "name": "Orders",
                "nodes": [{"name": "Start", "type": "n8n-nodes-base.manualTrigger"}],
                "connections": {}
            })))
            .mount(&server)
            .await;

        let graph = client(&server).await.fetch_workflow("dev", "wf-1").await.unwrap().unwrap();
        assert_eq!(graph.id.as_deref(), Some("wf-1"));
        assert_eq!(graph.nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_numeric_id_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7, "nodes": []})))
            .mount(&server)
            .await;

        let graph = client(&server).await.fetch_workflow("dev", "7").await.unwrap().unwrap();
        assert_eq!(graph.id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_not_found_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = client(&server).await.fetch_workflow("dev", "missing").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/auth"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/broken"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = client(&server).await;

        let auth = client.fetch_workflow("prod", "auth").await.unwrap_err();
        assert!(matches!(auth, FetchError::AuthenticationFailed { ref env_id } if env_id == "prod"));
        assert!(!auth.is_retryable());

        let busy = client.fetch_workflow("prod", "busy").await.unwrap_err();
        assert!(matches!(busy, FetchError::RateLimited { retry_after_secs: 3 }));

        let broken = client.fetch_workflow("prod", "broken").await.unwrap_err();
        assert!(matches!(broken, FetchError::ApiRequestFailed { status: 502, .. }));
        assert!(broken.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/wf-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server).await.fetch_workflow("dev", "wf-1").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_unreachable() {
        let client = N8nClient::new("http://127.0.0.1:1", "k", 1).unwrap();
        let err = client.fetch_workflow("dev", "wf-1").await.unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_list_follows_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "c"}],
                "nextCursor": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "a"}, {"id": 2}],
                "nextCursor": "page2"
            })))
            .mount(&server)
            .await;

        let ids = client(&server).await.list_workflows("dev").await.unwrap();
        assert_eq!(ids, vec!["a", "2", "c"]);
    }

    #[tokio::test]
    async fn test_list_cursor_is_query_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows"))
            .and(query_param("cursor", "eyJ+a2V5/Q=="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "c"}],
                "nextCursor": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows"))
            .and(query_param("limit", "250"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "a"}],
                "nextCursor": "eyJ+a2V5/Q=="
            })))
            .mount(&server)
            .await;

        let ids = client(&server).await.list_workflows("dev").await.unwrap();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_workflow_id_is_path_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/a%20b%2Fc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "a b/c", "nodes": []})))
            .mount(&server)
            .await;

        let graph = client(&server).await.fetch_workflow("dev", "a b/c").await.unwrap().unwrap();
        assert_eq!(graph.id.as_deref(), Some("a b/c"));
    }

    #[test]
    fn test_base_url_with_prefix() {
        let client = N8nClient::new("https://n8n.example.com/tools/", "k", 5).unwrap();
        assert_eq!(
            client.workflow_url("wf-1").as_str(),
            "https://n8n.example.com/tools/api/v1/workflows/wf-1"
        );
        assert!(N8nClient::new("not a url", "k", 5).is_err());
    }
}

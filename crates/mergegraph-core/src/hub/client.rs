//! HuggingFace Hub client.

use super::types::{HubModelInfo, HubUser, ListModelsParams};
use super::{file_url, list_url, model_info_url, ModelHub};
use crate::config::{HubConfig, Settings};
use crate::error::{MergeGraphError, Result};
use crate::network::{retry_async, RetryConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

/// Header carrying the hub's machine readable error kind.
const ERROR_CODE_HEADER: &str = "x-error-code";

/// Client for the HuggingFace Hub API.
pub struct HuggingFaceHub {
    client: Client,
    base_url: String,
    token: Option<String>,
    retry: RetryConfig,
}

impl std::fmt::Debug for HuggingFaceHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceHub")
            .field("base_url", &self.base_url)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

impl HuggingFaceHub {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Hub root, e.g. `https://huggingface.co`
    /// * `token` - Optional access token sent as a bearer credential
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(HubConfig::REQUEST_TIMEOUT)
            .user_agent(concat!("mergegraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MergeGraphError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            retry: RetryConfig::hub_requests().with_max_attempts(HubConfig::MAX_RETRIES),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.hub_api_base.clone(), settings.hub_token.clone())
    }

    /// Override the retry policy for transient HTTP failures.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn get(&self, url: &str, subject: &str) -> Result<Response> {
        let client = &self.client;
        let token = self.token.as_deref();

        let (result, stats) = retry_async(
            &self.retry,
            move || async move {
                let mut request = client.get(url);
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                let response = request.send().await?;
                check_response(response, subject).await
            },
            MergeGraphError::is_retryable,
        )
        .await;

        if stats.attempts > 1 {
            debug!("GET {} took {} attempts", url, stats.attempts);
        }
        result
    }
}

/// Map a non-success response to a typed error.
async fn check_response(response: Response, subject: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_code = response
        .headers()
        .get(ERROR_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);

    let not_found = || MergeGraphError::HubNotFound {
        model_id: subject.to_string(),
    };
    let gated = |message: String| MergeGraphError::HubGated {
        model_id: subject.to_string(),
        message,
    };

    Err(match error_code.as_deref() {
        Some("GatedRepo") => gated(message),
        Some("RepoNotFound") | Some("EntryNotFound") | Some("RevisionNotFound") => not_found(),
        _ => match status {
            StatusCode::NOT_FOUND => not_found(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => gated(message),
            _ => MergeGraphError::Network {
                message: format!("Hub returned {} for {}: {}", status, subject, message),
                status_code: Some(status.as_u16()),
            },
        },
    })
}

/// Target of a `Link: <url>; rel="next"` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().trim_start_matches("rel=").trim_matches('"') == "next");
        if !is_next {
            return None;
        }
        Some(
            target
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string(),
        )
    })
}

#[async_trait]
impl ModelHub for HuggingFaceHub {
    async fn list_models(&self, params: &ListModelsParams) -> Result<Vec<HubModelInfo>> {
        let mut url = Some(list_url(&self.base_url, params));
        let mut models = Vec::new();

        while let Some(page_url) = url.take() {
            let response = self.get(&page_url, "model listing").await?;
            url = next_link(response.headers());
            let page: Vec<HubModelInfo> = response.json().await.map_err(|e| {
                MergeGraphError::Json {
                    message: format!("Failed to parse model listing: {}", e),
                    source: None,
                }
            })?;
            debug!("Listed {} models from {}", page.len(), page_url);
            if page.is_empty() {
                break;
            }
            models.extend(page);

            if let Some(limit) = params.limit {
                if models.len() >= limit {
                    models.truncate(limit);
                    break;
                }
            }
        }

        Ok(models)
    }

    async fn model_info(&self, model_id: &str) -> Result<HubModelInfo> {
        let url = model_info_url(&self.base_url, model_id);
        let response = self.get(&url, model_id).await?;
        response.json().await.map_err(|e| MergeGraphError::Json {
            message: format!("Failed to parse model info for {}: {}", model_id, e),
            source: None,
        })
    }

    async fn download_file(&self, model_id: &str, filename: &str) -> Result<String> {
        let url = file_url(&self.base_url, model_id, filename);
        let response = self.get(&url, model_id).await?;
        Ok(response.text().await?)
    }

    async fn whoami(&self) -> Result<Option<String>> {
        if self.token.is_none() {
            return Ok(None);
        }
        let url = format!("{}/api/whoami-v2", self.base_url);
        match self.get(&url, "whoami").await {
            Ok(response) => {
                let user: HubUser = response.json().await?;
                Ok(Some(user.name))
            }
            Err(MergeGraphError::HubGated { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::time::Duration;

    fn hub(server: &mockito::ServerGuard) -> HuggingFaceHub {
        HuggingFaceHub::new(server.url(), Some("hf_test".into()))
            .unwrap()
            .with_retry(
                RetryConfig::hub_requests()
                    .with_max_attempts(2)
                    .with_base_delay(Duration::from_millis(1))
                    .with_jitter(false),
            )
    }

    #[test]
    fn test_next_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                "<https://huggingface.co/api/models?cursor=abc>; rel=\"next\"",
            ),
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("https://huggingface.co/api/models?cursor=abc")
        );
        assert!(next_link(&HeaderMap::new()).is_none());
    }

    #[tokio::test]
    async fn test_model_info_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/models/teamX/modelY")
            .match_header("authorization", "Bearer hf_test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"teamX/modelY","tags":["merge"],"likes":5}"#)
            .create_async()
            .await;

        let info = hub(&server).model_info("teamX/modelY").await.unwrap();
        assert_eq!(info.id, "teamX/modelY");
        assert_eq!(info.likes, Some(5));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_model_info_error_codes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/models/teamX/missing")
            .with_status(401)
            .with_header("x-error-code", "RepoNotFound")
            .with_body(r#"{"error":"Repository not found"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/models/teamX/gated")
            .with_status(403)
            .with_header("x-error-code", "GatedRepo")
            .with_body(r#"{"error":"Access restricted. Repo moved to https://huggingface.co/teamX/gated-v2"}"#)
            .create_async()
            .await;

        let hub = hub(&server);
        assert!(matches!(
            hub.model_info("teamX/missing").await,
            Err(MergeGraphError::HubNotFound { .. })
        ));
        match hub.model_info("teamX/gated").await {
            Err(MergeGraphError::HubGated { message, .. }) => {
                assert!(message.contains("moved to https://huggingface.co/teamX/gated-v2"))
            }
            other => panic!("expected gated error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/models/teamX/flaky")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let result = hub(&server).model_info("teamX/flaky").await;
        assert!(matches!(
            result,
            Err(MergeGraphError::Network {
                status_code: Some(503),
                ..
            })
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_models_follows_pagination() {
        let mut server = mockito::Server::new_async().await;
        let next = format!("<{}/api/models?cursor=2>; rel=\"next\"", server.url());
        server
            .mock("GET", "/api/models")
            .match_query(mockito::Matcher::UrlEncoded("filter".into(), "merge".into()))
            .with_status(200)
            .with_header("link", &next)
            .with_body(r#"[{"id":"a/one"},{"id":"a/two"}]"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/models")
            .match_query(mockito::Matcher::UrlEncoded("cursor".into(), "2".into()))
            .with_status(200)
            .with_body(r#"[{"id":"b/three"}]"#)
            .create_async()
            .await;

        let models = hub(&server)
            .list_models(&ListModelsParams::by_tag("merge"))
            .await
            .unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a/one", "a/two", "b/three"]);
    }

    #[tokio::test]
    async fn test_download_file() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/teamX/modelY/resolve/main/merge.yml")
            .with_status(200)
            .with_body("merge_method: slerp\n")
            .create_async()
            .await;
        server
            .mock("GET", "/teamX/modelY/resolve/main/README.md")
            .with_status(404)
            .with_header("x-error-code", "EntryNotFound")
            .create_async()
            .await;

        let hub = hub(&server);
        assert_eq!(
            hub.download_file("teamX/modelY", "merge.yml").await.unwrap(),
            "merge_method: slerp\n"
        );
        assert!(hub
            .download_file("teamX/modelY", "README.md")
            .await
            .unwrap_err()
            .is_unresolvable_model());
    }
}

//! GitHub REST client for repository webhooks.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::error::{GithubError, GithubResult};
use super::types::{ApiErrorResponse, CreateHookRequest, Hook, RepoRef};
use super::WebhookRegistrar;

/// Default API root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Hooks requested per page when listing.
const PER_PAGE: usize = 100;

/// Client for the webhooks of a single repository.
#[derive(Debug, Clone)]
pub struct GithubClient {
    /// HTTP client.
    client: Client,
    /// API root (e.g., "https://api.github.com").
    base_url: String,
    /// Personal access token.
    token: String,
    /// Repository whose hooks are managed.
    repo: RepoRef,
}

impl GithubClient {
    /// Create a client for `repo`.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        repo: RepoRef,
    ) -> GithubResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("hookrelay/", env!("CARGO_PKG_VERSION"))),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            repo,
        })
    }

    /// The repository this client manages.
    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    fn hooks_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/hooks",
            self.base_url, self.repo.owner, self.repo.repo
        )
    }

    async fn list_page(&self, page: usize) -> GithubResult<Vec<Hook>> {
        let url = self.hooks_url();
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("per_page", PER_PAGE), ("page", page)])
            .send()
            .await
            .map_err(|e| connection_failed(&url, e))?;

        self.handle_response(response).await
    }

    /// Handle response and parse JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> GithubResult<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| GithubError::ParseError(format!("Failed to parse response: {}", e)))
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn error_from(response: reqwest::Response) -> GithubError {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return GithubError::Unauthorized;
        }

        let message = match response.json::<ApiErrorResponse>().await {
            Ok(body) => body.message,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        GithubError::ApiError {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl WebhookRegistrar for GithubClient {
    /// List every hook on the repository, following pagination.
    async fn list_hooks(&self) -> GithubResult<Vec<Hook>> {
        let mut hooks = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.list_page(page).await?;
            let short = batch.len() < PER_PAGE;
            hooks.extend(batch);
            if short {
                break;
            }
            page += 1;
        }
        Ok(hooks)
    }

    async fn create_hook(&self, url: &str) -> GithubResult<Hook> {
        let endpoint = self.hooks_url();
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.token)
            .json(&CreateHookRequest::all_events(url))
            .send()
            .await
            .map_err(|e| connection_failed(&endpoint, e))?;

        self.handle_response(response).await
    }

    async fn delete_hook(&self, id: u64) -> GithubResult<()> {
        let url = format!("{}/{}", self.hooks_url(), id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| connection_failed(&url, e))?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(GithubError::HookNotFound(id)),
            _ => Err(Self::error_from(response).await),
        }
    }
}

/// Requests that never got a response.
fn connection_failed(url: &str, err: reqwest::Error) -> GithubError {
    GithubError::ConnectionFailed {
        url: url.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = GithubClient::new(
            "https://api.github.com/",
            "token",
            RepoRef::new("octo", "hello"),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://api.github.com");
        assert_eq!(
            client.hooks_url(),
            "https://api.github.com/repos/octo/hello/hooks"
        );
    }
}

//! GitHub REST API types for repository webhooks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `owner/repo` pair identifying the target repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid repository name {0:?}, expected owner/repo")]
pub struct ParseRepoError(pub String);

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl FromStr for RepoRef {
    type Err = ParseRepoError;

    /// Split on the first `/`; both halves must be non-empty.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => {
                Ok(Self::new(owner, repo))
            }
            _ => Err(ParseRepoError(s.to_string())),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Delivery settings of a repository hook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// A repository webhook as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub id: u64,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default)]
    pub config: HookConfig,
}

impl Hook {
    /// Whether this hook delivers to some key under `hub_base`.
    pub fn points_at(&self, hub_base: &str) -> bool {
        let prefix = format!("{}/", hub_base.trim_end_matches('/'));
        self.config
            .url
            .as_deref()
            .is_some_and(|url| url.starts_with(&prefix))
    }
}

/// Body of `POST /repos/{owner}/{repo}/hooks`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateHookRequest {
    pub name: String,
    pub active: bool,
    pub events: Vec<String>,
    pub config: HookConfig,
}

impl CreateHookRequest {
    /// A hook subscribed to every event, delivering JSON to `url`.
    pub fn all_events(url: impl Into<String>) -> Self {
        Self {
            name: "web".to_string(),
            active: true,
            events: vec!["*".to_string()],
            config: HookConfig {
                url: Some(url.into()),
                content_type: Some("json".to_string()),
            },
        }
    }
}

/// Error body returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub message: String,

    #[serde(default)]
    pub documentation_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(id: u64, url: &str) -> Hook {
        Hook {
            id,
            name: "web".to_string(),
            active: true,
            events: vec!["*".to_string()],
            config: HookConfig {
                url: Some(url.to_string()),
                content_type: Some("json".to_string()),
            },
        }
    }

    #[test]
    fn test_repo_ref_parse() {
        let repo: RepoRef = "octo/hello-world".parse().unwrap();
        assert_eq!(repo, RepoRef::new("octo", "hello-world"));
        assert_eq!(repo.to_string(), "octo/hello-world");

        let nested: RepoRef = "octo/a/b".parse().unwrap();
        assert_eq!(nested.repo, "a/b");

        assert!("octo".parse::<RepoRef>().is_err());
        assert!("/repo".parse::<RepoRef>().is_err());
        assert!("octo/".parse::<RepoRef>().is_err());
    }

    #[test]
    fn test_points_at_matches_any_key_under_base() {
        let base = "https://relay.example.com";
        assert!(hook(1, "https://relay.example.com/abc123").points_at(base));
        assert!(hook(2, "https://relay.example.com/other").points_at("https://relay.example.com/"));
        assert!(!hook(3, "https://ci.example.com/hook").points_at(base));
        assert!(!hook(4, "https://relay.example.com.evil.io/abc").points_at(base));
    }

    #[test]
    fn test_points_at_without_url() {
        let mut h = hook(1, "x");
        h.config.url = None;
        assert!(!h.points_at("https://relay.example.com"));
    }

    #[test]
    fn test_create_request_shape() {
        let body = serde_json::to_value(CreateHookRequest::all_events("https://relay/k")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "name": "web",
                "active": true,
                "events": ["*"],
                "config": {"url": "https://relay/k", "content_type": "json"}
            })
        );
    }

    #[test]
    fn test_hook_tolerates_extra_fields() {
        let raw = r#"{"id":7,"type":"Repository","name":"web","active":true,
            "events":["push"],"config":{"url":"https://x/y","insecure_ssl":"0"},
            "created_at":"2024-01-01T00:00:00Z"}"#;
        let hook: Hook = serde_json::from_str(raw).unwrap();
        assert_eq!(hook.id, 7);
        assert_eq!(hook.config.url.as_deref(), Some("https://x/y"));
    }
}

//! GitHub client error types.

use thiserror::Error;

/// Result type for GitHub operations.
pub type GithubResult<T> = Result<T, GithubError>;

/// Errors that can occur while managing repository webhooks.
#[derive(Debug, Error)]
pub enum GithubError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// GitHub returned an error response.
    #[error("GitHub API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// Hook not found.
    #[error("Hook not found: {0}")]
    HookNotFound(u64),

    /// Token missing, expired, or lacking the `admin:repo_hook` scope.
    #[error("Unauthorized: GitHub rejected the token")]
    Unauthorized,

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Connection failed.
    #[error("Failed to connect to GitHub at {url}: {message}")]
    ConnectionFailed { url: String, message: String },
}

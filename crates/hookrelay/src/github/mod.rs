//! GitHub webhook registration.
//!
//! The agent owns exactly one repository hook per session. Leftover hooks from
//! sessions that died without cleaning up are recognised by their URL, which
//! always starts with the hub's base address.

mod client;
mod error;
mod types;

use async_trait::async_trait;

pub use client::{DEFAULT_API_URL, GithubClient};
pub use error::{GithubError, GithubResult};
pub use types::*;

/// Create, list and delete the hooks of one repository.
#[async_trait]
pub trait WebhookRegistrar: Send + Sync {
    /// Every hook currently configured on the repository.
    async fn list_hooks(&self) -> GithubResult<Vec<Hook>>;

    /// Create a hook subscribed to all events, delivering JSON to `url`.
    async fn create_hook(&self, url: &str) -> GithubResult<Hook>;

    /// Delete a hook by id.
    async fn delete_hook(&self, id: u64) -> GithubResult<()>;

    /// Hooks pointing at any key under `hub_base`.
    async fn list_stale(&self, hub_base: &str) -> GithubResult<Vec<Hook>> {
        let hooks = self.list_hooks().await?;
        Ok(hooks.into_iter().filter(|h| h.points_at(hub_base)).collect())
    }
}

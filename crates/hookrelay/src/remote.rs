//! Owner/repo extraction from a git remote URL.

use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use crate::config::ConfigError;
use crate::github::RepoRef;

static SSH_REMOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:ssh://)?(?:[^@/]+@)?github\.com[:/]([^/]+)/([^/]+?)(?:\.git)?/?$")
        .expect("SSH remote pattern compiles")
});

static HTTPS_REMOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:[^@/]+@)?[^/]*github\.com[^/]*/([^/]+)/([^/]+?)(?:\.git)?/?$")
        .expect("HTTPS remote pattern compiles")
});

/// Which form a remote URL was recognised as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteMatch {
    /// `git@github.com:owner/repo.git` or `ssh://git@github.com/owner/repo`.
    Ssh(RepoRef),
    /// `https://github.com/owner/repo(.git)`.
    Https(RepoRef),
    /// Not a GitHub remote.
    NoMatch,
}

impl RemoteMatch {
    pub fn into_repo(self) -> Option<RepoRef> {
        match self {
            Self::Ssh(repo) | Self::Https(repo) => Some(repo),
            Self::NoMatch => None,
        }
    }
}

/// Classify `url`. The SSH form is tried before the HTTPS form.
pub fn parse_remote(url: &str) -> RemoteMatch {
    let url = url.trim();
    if let Some(caps) = SSH_REMOTE.captures(url) {
        return RemoteMatch::Ssh(RepoRef::new(&caps[1], &caps[2]));
    }
    if let Some(caps) = HTTPS_REMOTE.captures(url) {
        return RemoteMatch::Https(RepoRef::new(&caps[1], &caps[2]));
    }
    RemoteMatch::NoMatch
}

/// Repository of the named remote in the current working tree.
pub async fn repo_from_remote(remote: &str) -> Result<RepoRef, ConfigError> {
    let output = Command::new("git")
        .args(["remote", "get-url", remote])
        .output()
        .await
        .map_err(|e| ConfigError::Git(format!("running git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ConfigError::Git(stderr.trim().to_string()));
    }

    let url = String::from_utf8_lossy(&output.stdout);
    parse_remote(&url)
        .into_repo()
        .ok_or_else(|| ConfigError::NotGithubRemote(url.trim().to_string()))
}

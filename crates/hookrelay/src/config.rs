//! Agent configuration: defaults, config file, environment, and CLI flags.
//!
//! Precedence, lowest first: built-in defaults, `config.toml`,
//! `HOOKRELAY__*` environment variables, command-line flags.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_PING_INTERVAL, DispatchOptions, EventFilter,
};
use crate::github::{DEFAULT_API_URL, ParseRepoError, RepoRef};
use crate::remote::repo_from_remote;

pub const APP_NAME: &str = "hookrelay";

/// Public hub used when no endpoint is configured.
pub const DEFAULT_ENDPOINT: &str = "https://github-events-proxy.herokuapp.com";

/// Hub port when neither `--port` nor `PORT` is set.
pub const DEFAULT_HUB_PORT: u16 = 5000;

/// Remote inspected when no repository is given.
pub const DEFAULT_REMOTE: &str = "origin";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GitHub API token is not set (export GITHUB_TOKEN or add api.github.com to ~/.netrc)")]
    MissingToken,

    #[error("reading {}: {source}", path.display())]
    Netrc {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    InvalidRepo(#[from] ParseRepoError),

    #[error("git remote does not belong to GitHub: {0}")]
    NotGithubRemote(String),

    #[error("git remote lookup failed: {0}")]
    Git(String),

    #[error("loading configuration: {0}")]
    File(#[from] config::ConfigError),

    #[error("unable to determine configuration directory")]
    NoConfigDir,
}

/// Settings read from `config.toml` and `HOOKRELAY__*` variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub endpoint: Option<String>,
    pub forward: Option<String>,
    pub github_api: Option<String>,
    pub pretty: bool,
    pub save: bool,
    pub save_dir: Option<PathBuf>,
    pub only: Vec<String>,
    pub ping_interval_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Load `path` (optional) layered under the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`FileConfig::load`], reading variables from `vars` instead of the
    /// process environment when given.
    pub fn load_with_env(
        path: &Path,
        vars: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let built = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(&env_prefix())
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("only")
                    .source(vars),
            )
            .build()?;

        Ok(built.try_deserialize()?)
    }
}

/// Agent flags as given on the command line. `None`/`false` defers to the
/// config file.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    pub repo: Option<String>,
    pub remote: Option<String>,
    pub only: Vec<String>,
    pub pretty: bool,
    pub save: bool,
    pub save_dir: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub forward: Option<String>,
    pub github_api: Option<String>,
    pub ping_interval_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
}

/// Fully merged agent settings, before the repository and token are resolved.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub repo: Option<String>,
    pub remote: String,
    pub endpoint: String,
    pub github_api: String,
    pub ping_interval: Duration,
    pub connect_timeout: Duration,
    pub dispatch: DispatchOptions,
}

impl AgentSettings {
    pub fn merge(cli: AgentOptions, file: FileConfig) -> Self {
        let only = if cli.only.is_empty() {
            file.only
        } else {
            cli.only
        };

        let save_dir = cli.save_dir.or(file.save_dir);
        let save_dir = if cli.save || file.save || save_dir.is_some() {
            Some(save_dir.unwrap_or_else(|| PathBuf::from(".")))
        } else {
            None
        };

        let ping_interval = cli
            .ping_interval_secs
            .or(file.ping_interval_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PING_INTERVAL);

        let connect_timeout = cli
            .connect_timeout_secs
            .or(file.connect_timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        Self {
            repo: cli.repo,
            remote: cli.remote.unwrap_or_else(|| DEFAULT_REMOTE.to_string()),
            endpoint: cli
                .endpoint
                .or(file.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            github_api: cli
                .github_api
                .or(file.github_api)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            ping_interval,
            connect_timeout,
            dispatch: DispatchOptions {
                filter: EventFilter::new(only),
                pretty: cli.pretty || file.pretty,
                save_dir,
                forward_url: cli.forward.or(file.forward),
            },
        }
    }

    /// The explicit `owner/repo`, or the one behind the configured git remote.
    pub async fn resolve_repo(&self) -> Result<RepoRef, ConfigError> {
        match &self.repo {
            Some(repo) => Ok(repo.parse()?),
            None => repo_from_remote(&self.remote).await,
        }
    }
}

/// `$XDG_CONFIG_HOME/hookrelay`, falling back to the platform config dir.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// Config file to read: `path` itself, `path/config.toml` for a directory,
/// or the default location.
pub fn config_file_path(path: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match path {
        Some(path) if path.is_dir() => Ok(path.join("config.toml")),
        Some(path) => Ok(path),
        None => Ok(default_config_dir()?.join("config.toml")),
    }
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

//! GitHub token discovery.

use std::path::{Path, PathBuf};

use crate::config::ConfigError;

/// Environment variable checked first.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// `.netrc` machine whose password is used as the token.
pub const NETRC_MACHINE: &str = "api.github.com";

/// Resolve the API token: `env_token` if non-empty, otherwise the
/// `api.github.com` password from the netrc file at `netrc`.
pub fn resolve_token(
    env_token: Option<String>,
    netrc: Option<&Path>,
) -> Result<String, ConfigError> {
    if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
        return Ok(token.trim().to_string());
    }

    let Some(path) = netrc else {
        return Err(ConfigError::MissingToken);
    };

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::MissingToken);
        }
        Err(e) => {
            return Err(ConfigError::Netrc {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    netrc_password(&contents, NETRC_MACHINE)
        .filter(|t| !t.is_empty())
        .ok_or(ConfigError::MissingToken)
}

/// Token from the process environment or `~/.netrc`.
pub fn token_from_env() -> Result<String, ConfigError> {
    resolve_token(std::env::var(TOKEN_ENV).ok(), default_netrc_path().as_deref())
}

pub fn default_netrc_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".netrc"))
}

/// Password for `machine` in netrc-formatted `contents`.
///
/// Falls back to the `default` entry. `macdef` bodies are skipped up to the
/// next blank line.
pub fn netrc_password(contents: &str, machine: &str) -> Option<String> {
    let mut matched: Option<String> = None;
    let mut fallback: Option<String> = None;
    let mut current: Option<&str> = None;
    let mut in_macdef = false;

    for line in contents.lines() {
        if in_macdef {
            if line.trim().is_empty() {
                in_macdef = false;
            }
            continue;
        }

        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            match token {
                "machine" => current = tokens.next(),
                "default" => current = Some(""),
                "password" => {
                    let Some(value) = tokens.next() else { break };
                    match current {
                        Some(m) if m == machine && matched.is_none() => {
                            matched = Some(value.to_string());
                        }
                        Some("") if fallback.is_none() => fallback = Some(value.to_string()),
                        _ => {}
                    }
                }
                "login" | "account" => {
                    tokens.next();
                }
                "macdef" => {
                    in_macdef = true;
                    break;
                }
                t if t.starts_with('#') => break,
                _ => {}
            }
        }
    }

    matched.or(fallback)
}

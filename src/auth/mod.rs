//! Authentication for GitLab
//!
//! Supports environment variables and the config file.

use crate::config::{BotConfig, validate_url};
use crate::error::{Error, Result};
use std::env;
use tracing::debug;

/// Host used when nothing else is configured
pub const DEFAULT_GITLAB_URL: &str = "https://gitlab.com";

/// Environment variables checked for a token, in order
const TOKEN_ENV_VARS: [&str; 2] = ["GITLAB_TOKEN", "GL_TOKEN"];

/// Environment variable checked for the GitLab URL
const URL_ENV_VAR: &str = "GITLAB_URL";

/// Source of authentication token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    /// Token from the config file
    ConfigFile,
    /// Token from environment variable
    EnvVar,
}

/// Resolved GitLab credentials
#[derive(Clone)]
pub struct GitLabAuthConfig {
    /// Personal access token
    pub token: String,
    /// Where the token came from
    pub source: AuthSource,
    /// Base URL of the GitLab instance
    pub base_url: String,
}

impl std::fmt::Debug for GitLabAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabAuthConfig")
            .field("token", &"<redacted>")
            .field("source", &self.source)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Resolve GitLab credentials from the process environment and `config`.
///
/// Precedence for the URL: `url_override` (CLI flag), `GITLAB_URL`, config
/// file, then gitlab.com. The token comes from `GITLAB_TOKEN` / `GL_TOKEN`
/// before the config file.
pub fn get_gitlab_auth(config: &BotConfig, url_override: Option<&str>) -> Result<GitLabAuthConfig> {
    resolve_gitlab_auth(config, url_override, |name| env::var(name).ok())
}

/// Same as [`get_gitlab_auth`] with an explicit variable lookup.
pub fn resolve_gitlab_auth(
    config: &BotConfig,
    url_override: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<GitLabAuthConfig> {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let base_url = url_override
        .map(ToString::to_string)
        .or_else(|| non_empty(URL_ENV_VAR))
        .or_else(|| config.gitlab.url.clone())
        .unwrap_or_else(|| DEFAULT_GITLAB_URL.to_string());
    validate_url(&base_url)?;
    let base_url = base_url.trim_end_matches('/').to_string();

    if let Some(token) = TOKEN_ENV_VARS.iter().find_map(|var| non_empty(var)) {
        debug!(%base_url, "using GitLab token from environment");
        return Ok(GitLabAuthConfig {
            token,
            source: AuthSource::EnvVar,
            base_url,
        });
    }

    match config.gitlab.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => {
            debug!(%base_url, "using GitLab token from config file");
            Ok(GitLabAuthConfig {
                token: token.to_string(),
                source: AuthSource::ConfigFile,
                base_url,
            })
        }
        _ => Err(Error::Auth(
            "no GitLab token found; set GITLAB_TOKEN or gitlab.token in the config file"
                .to_string(),
        )),
    }
}

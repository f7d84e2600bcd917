//! Bot configuration loaded from `config.toml`.
//!
//! Everything that used to be deployment-specific (trunk branches, who may
//! trigger merges in which project, poll timeouts) lives here and is passed
//! explicitly into the workers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name for merge-bot settings within the user config dir.
const CONFIG_DIR: &str = "merge-bot";

/// Filename for the bot configuration.
const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BotConfig {
    /// GitLab connection settings
    pub gitlab: GitLabSettings,
    /// Branches the bot is willing to merge into
    pub trunk_branches: Vec<String>,
    /// Per-project authorization lists
    pub projects: Vec<ProjectPolicy>,
    /// Poll intervals and timeouts
    pub timing: Timing,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            gitlab: GitLabSettings::default(),
            trunk_branches: vec!["main".to_string(), "master".to_string()],
            projects: Vec::new(),
            timing: Timing::default(),
        }
    }
}

/// GitLab connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitLabSettings {
    /// Base URL, e.g. `https://gitlab.example.com`
    pub url: Option<String>,
    /// Personal access token of the bot user
    pub token: Option<String>,
}

/// Users allowed to trigger merges and tags in one project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectPolicy {
    /// Project ID
    pub id: u64,
    /// User IDs permitted to merge and tag
    pub authorized_users: Vec<u64>,
}

/// Poll intervals and per-phase timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timing {
    /// Delay between two passes of a project worker
    pub worker_interval_secs: u64,
    /// Delay between two project discovery passes
    pub discovery_interval_secs: u64,
    /// How long a rebase may take
    pub rebase_timeout_secs: u64,
    /// How long CI may take
    pub pipeline_timeout_secs: u64,
    /// How long GitLab may take to compute `merge_status`
    pub merge_status_timeout_secs: u64,
    /// How long the merge itself may take
    pub merge_timeout_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            worker_interval_secs: 5,
            discovery_interval_secs: 10 * 60,
            rebase_timeout_secs: 30,
            pipeline_timeout_secs: 90 * 60,
            merge_status_timeout_secs: 30,
            merge_timeout_secs: 30,
        }
    }
}

impl Timing {
    /// Delay between two passes of a project worker
    pub const fn worker_interval(&self) -> Duration {
        Duration::from_secs(self.worker_interval_secs)
    }

    /// Delay between two project discovery passes
    pub const fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    /// Rebase timeout
    pub const fn rebase_timeout(&self) -> Duration {
        Duration::from_secs(self.rebase_timeout_secs)
    }

    /// Pipeline timeout
    pub const fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }

    /// Merge status timeout
    pub const fn merge_status_timeout(&self) -> Duration {
        Duration::from_secs(self.merge_status_timeout_secs)
    }

    /// Merge completion timeout
    pub const fn merge_timeout(&self) -> Duration {
        Duration::from_secs(self.merge_timeout_secs)
    }
}

impl BotConfig {
    /// Authorized users for a project, `None` meaning anyone may act.
    pub fn authorized_users(&self, project_id: u64) -> Option<&[u64]> {
        self.projects
            .iter()
            .find(|p| p.id == project_id)
            .map(|p| p.authorized_users.as_slice())
    }

    /// Whether `user_id` may trigger merges and tags in `project_id`
    pub fn is_authorized(&self, project_id: u64, user_id: u64) -> bool {
        self.authorized_users(project_id)
            .is_none_or(|users| users.contains(&user_id))
    }

    /// Whether the bot may merge into `branch`
    pub fn is_trunk(&self, branch: &str) -> bool {
        self.trunk_branches.iter().any(|b| b == branch)
    }

    /// Check invariants the rest of the bot relies on
    pub fn validate(&self) -> Result<()> {
        if self.trunk_branches.is_empty() {
            return Err(Error::Config(
                "trunk_branches must list at least one branch".to_string(),
            ));
        }
        if let Some(url) = &self.gitlab.url {
            validate_url(url)?;
        }
        for policy in &self.projects {
            if policy.authorized_users.is_empty() {
                return Err(Error::Config(format!(
                    "project {} has an empty authorized_users list; remove the entry to allow anyone",
                    policy.id
                )));
            }
        }
        Ok(())
    }
}

/// Reject anything that is not an absolute http(s) URL.
pub fn validate_url(raw: &str) -> Result<()> {
    let parsed =
        url::Url::parse(raw).map_err(|e| Error::Config(format!("invalid GitLab URL {raw}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Config(format!(
            "unsupported URL scheme {other} in {raw}"
        ))),
    }
}

/// Default config path: `<config_dir>/merge-bot/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Load configuration from an explicit path.
///
/// The file must exist.
pub fn load_config(path: &Path) -> Result<BotConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let config: BotConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;

    config.validate()?;
    Ok(config)
}

/// Load configuration from `path`, or from the default location.
///
/// A missing default file yields the built-in defaults; a missing explicit
/// file is an error.
pub fn load_config_or_default(path: Option<&Path>) -> Result<BotConfig> {
    if let Some(path) = path {
        return load_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => Ok(BotConfig::default()),
    }
}

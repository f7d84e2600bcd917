//! Core types for the merge bot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A GitLab user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Numeric user ID
    pub id: u64,
    /// Login name
    pub username: String,
}

/// How a project lands merge requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeMethod {
    /// Plain merge commit
    Merge,
    /// Merge commit with semi-linear history
    RebaseMerge,
    /// Fast-forward only
    FastForward,
}

impl MergeMethod {
    /// Parse GitLab's `merge_method` field
    pub fn from_api(value: &str) -> Self {
        match value {
            "rebase_merge" => Self::RebaseMerge,
            "ff" => Self::FastForward,
            _ => Self::Merge,
        }
    }

    /// Whether the source branch must be up to date with its target
    pub const fn requires_rebase(self) -> bool {
        !matches!(self, Self::Merge)
    }
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::RebaseMerge => write!(f, "rebase_merge"),
            Self::FastForward => write!(f, "ff"),
        }
    }
}

/// A project the bot can see
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Numeric project ID
    pub id: u64,
    /// Display name
    pub name: String,
    /// Full path (`group/project`)
    pub path_with_namespace: String,
    /// Merge method configured on the project
    pub merge_method: MergeMethod,
    /// Merging requires a successful pipeline
    pub only_allow_merge_if_pipeline_succeeds: bool,
    /// A skipped pipeline counts as successful
    pub allow_merge_on_skipped_pipeline: bool,
}

/// Merge request state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MrState {
    /// Open and mergeable in principle
    Opened,
    /// Already merged
    Merged,
    /// Closed without merging
    Closed,
    /// Locked by GitLab while a merge is in flight
    Locked,
    /// Any state GitLab adds in the future
    Other(String),
}

impl MrState {
    /// Parse GitLab's `state` field
    pub fn from_api(value: &str) -> Self {
        match value {
            "opened" => Self::Opened,
            "merged" => Self::Merged,
            "closed" => Self::Closed,
            "locked" => Self::Locked,
            other => Self::Other(other.to_string()),
        }
    }

    /// Value used in API query strings
    pub fn as_str(&self) -> &str {
        match self {
            Self::Opened => "opened",
            Self::Merged => "merged",
            Self::Closed => "closed",
            Self::Locked => "locked",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for MrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GitLab's asynchronous mergeability check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStatus {
    /// Not computed yet
    Unchecked,
    /// Being computed
    Checking,
    /// No conflicts
    CanBeMerged,
    /// Conflicts or other blockers
    CannotBeMerged,
    /// Any other value
    Other(String),
}

impl MergeStatus {
    /// Parse GitLab's `merge_status` field
    pub fn from_api(value: &str) -> Self {
        match value {
            "unchecked" => Self::Unchecked,
            "checking" => Self::Checking,
            "can_be_merged" => Self::CanBeMerged,
            "cannot_be_merged" => Self::CannotBeMerged,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether GitLab is still computing the status
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Unchecked | Self::Checking)
    }
}

/// A merge request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct MergeRequest {
    /// Project-scoped MR number
    pub iid: u64,
    /// Project the MR belongs to
    pub project_id: u64,
    /// MR title
    pub title: String,
    /// Who opened the MR
    pub author: User,
    /// Current assignee, if any
    pub assignee: Option<User>,
    /// Source branch name
    pub source_branch: String,
    /// Target branch name
    pub target_branch: String,
    /// Project the source branch lives in
    pub source_project_id: u64,
    /// Project the target branch lives in
    pub target_project_id: u64,
    /// Draft / WIP flag
    pub draft: bool,
    /// All blocking discussions are resolved
    pub blocking_discussions_resolved: bool,
    /// Current state
    pub state: MrState,
    /// Head commit of the source branch
    pub sha: Option<String>,
    /// Mergeability check result
    pub merge_status: MergeStatus,
    /// Only present when requested with `MrInclude::rebase_in_progress`
    pub rebase_in_progress: Option<bool>,
    /// Only present when requested with `MrInclude::diverged_commits_count`
    pub diverged_commits_count: Option<u64>,
    /// Web URL for the MR
    pub web_url: String,
}

impl MergeRequest {
    /// Whether the MR is currently assigned to `user_id`
    pub fn is_assigned_to(&self, user_id: u64) -> bool {
        self.assignee.as_ref().is_some_and(|a| a.id == user_id)
    }
}

/// Optional, expensive fields GitLab computes on request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MrInclude {
    /// Ask for `rebase_in_progress`
    pub rebase_in_progress: bool,
    /// Ask for `diverged_commits_count`
    pub diverged_commits_count: bool,
}

impl MrInclude {
    /// No extra fields
    pub const NONE: Self = Self {
        rebase_in_progress: false,
        diverged_commits_count: false,
    };

    /// Include `rebase_in_progress`
    pub const REBASE: Self = Self {
        rebase_in_progress: true,
        diverged_commits_count: false,
    };

    /// Include `diverged_commits_count`
    pub const DIVERGED: Self = Self {
        rebase_in_progress: false,
        diverged_commits_count: true,
    };
}

/// Payload for opening a new merge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMergeRequest {
    /// Source branch name
    pub source_branch: String,
    /// Target branch name
    pub target_branch: String,
    /// MR title
    pub title: String,
}

/// Pipeline status as reported by GitLab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Created, not yet queued
    Created,
    /// Waiting for a resource group
    WaitingForResource,
    /// Preparing runners
    Preparing,
    /// Queued
    Pending,
    /// Running
    Running,
    /// Passed
    Success,
    /// Failed
    Failed,
    /// Canceled by a user or newer pipeline
    Canceled,
    /// Skipped (e.g. `[ci skip]`)
    Skipped,
    /// Blocked on a manual job
    Manual,
    /// Scheduled for later
    Scheduled,
    /// Any status GitLab adds in the future
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::WaitingForResource => "waiting_for_resource",
            Self::Preparing => "preparing",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A CI pipeline attached to a merge request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline ID
    pub id: u64,
    /// Commit the pipeline ran for
    pub sha: String,
    /// Current status
    pub status: PipelineStatus,
}

/// A comment on a merge request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// Note ID
    pub id: u64,
    /// Comment author
    pub author: User,
    /// Comment body text
    pub body: String,
    /// When the comment was written
    pub created_at: DateTime<Utc>,
}

/// A tag requested through an MR comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRequest {
    /// Tag name, e.g. `v1.2.3`
    pub tag_name: String,
    /// Release note lines, bullets stripped
    pub release_notes: Vec<String>,
}

impl TagRequest {
    /// Release description with one note per Markdown line
    pub fn release_description(&self) -> String {
        self.release_notes.join("  \n")
    }
}

/// How handling of one merge request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Merged, history rebased, and any requested tags created
    Merged {
        /// Tags created from comments
        tags: Vec<String>,
    },
    /// Handed back to a human with a comment
    Aborted {
        /// Reason posted on the MR
        reason: String,
    },
}

impl Outcome {
    /// Whether the MR was merged
    pub const fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

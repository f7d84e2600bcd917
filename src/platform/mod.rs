//! Platform services for GitLab
//!
//! Provides the narrow interface the merge lifecycle needs from the hosting
//! platform. Every operation is a single REST call; no sequencing lives here.

mod gitlab;

pub use gitlab::GitLabService;

use crate::auth::GitLabAuthConfig;
use crate::error::Result;
use crate::types::{
    MergeRequest, MrInclude, MrState, NewMergeRequest, Note, Pipeline, Project, User,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Platform service trait for MR operations
///
/// Implementations must be safe for concurrent use by independent project
/// workers.
#[async_trait]
pub trait PlatformService: Send + Sync {
    /// The user the token authenticates as
    async fn current_user(&self) -> Result<User>;

    /// All non-archived projects the user is a member of
    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Fetch a single project
    async fn get_project(&self, project_id: u64) -> Result<Project>;

    /// Fetch a single MR, optionally with expensive extra fields
    async fn get_merge_request(
        &self,
        project_id: u64,
        iid: u64,
        include: MrInclude,
    ) -> Result<MergeRequest>;

    /// List MRs in a project filtered by assignee and state
    async fn list_merge_requests(
        &self,
        project_id: u64,
        assignee_id: u64,
        state: MrState,
    ) -> Result<Vec<MergeRequest>>;

    /// List pipelines of an MR, newest first
    async fn list_mr_pipelines(&self, project_id: u64, iid: u64) -> Result<Vec<Pipeline>>;

    /// List the most recent user comments on an MR, newest first
    async fn list_mr_notes(&self, project_id: u64, iid: u64, per_page: u32) -> Result<Vec<Note>>;

    /// Create a comment on an MR
    async fn create_mr_note(&self, project_id: u64, iid: u64, body: &str) -> Result<()>;

    /// Rebase the MR's source branch onto its target
    async fn rebase_mr(&self, project_id: u64, iid: u64, skip_ci: bool) -> Result<()>;

    /// Accept (merge) an MR
    ///
    /// Refusals surface as `Error::Api` carrying the HTTP status.
    async fn merge_mr(&self, project_id: u64, iid: u64) -> Result<()>;

    /// Change the assignee; `None` clears it
    async fn set_mr_assignee(&self, project_id: u64, iid: u64, assignee_id: Option<u64>)
    -> Result<()>;

    /// Close an MR without merging
    async fn close_mr(&self, project_id: u64, iid: u64) -> Result<()>;

    /// Open a new MR
    async fn create_mr(&self, project_id: u64, mr: &NewMergeRequest) -> Result<MergeRequest>;

    /// Create a tag pointing at `git_ref`
    async fn create_tag(&self, project_id: u64, tag_name: &str, git_ref: &str) -> Result<()>;

    /// Create a release for an existing tag
    async fn create_release(&self, project_id: u64, tag_name: &str, description: &str)
    -> Result<()>;
}

/// Create the platform service for the resolved credentials
pub fn create_platform_service(auth: &GitLabAuthConfig) -> Result<Arc<dyn PlatformService>> {
    let service = GitLabService::new(auth.token.clone(), &auth.base_url)?;
    Ok(Arc::new(service))
}

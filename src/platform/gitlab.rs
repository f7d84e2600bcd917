//! GitLab platform service implementation

use crate::error::{Error, Result};
use crate::platform::PlatformService;
use crate::types::{
    MergeMethod, MergeRequest, MergeStatus, MrInclude, MrState, NewMergeRequest, Note, Pipeline,
    Project, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// GitLab service using reqwest
pub struct GitLabService {
    client: Client,
    token: String,
    base_url: String,
}

#[derive(Deserialize)]
struct GlProject {
    id: u64,
    name: String,
    path_with_namespace: String,
    merge_method: Option<String>,
    only_allow_merge_if_pipeline_succeeds: Option<bool>,
    allow_merge_on_skipped_pipeline: Option<bool>,
}

#[derive(Deserialize)]
struct GlMergeRequest {
    iid: u64,
    project_id: u64,
    title: String,
    author: User,
    assignee: Option<User>,
    source_branch: String,
    target_branch: String,
    source_project_id: u64,
    target_project_id: u64,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    work_in_progress: bool,
    blocking_discussions_resolved: Option<bool>,
    state: String, // "opened", "closed", "merged", "locked"
    sha: Option<String>,
    merge_status: Option<String>, // "can_be_merged", "cannot_be_merged", etc.
    rebase_in_progress: Option<bool>,
    diverged_commits_count: Option<u64>,
    web_url: String,
}

#[derive(Deserialize)]
struct GlNote {
    id: u64,
    body: String,
    author: User,
    created_at: DateTime<Utc>,
    #[serde(default)]
    system: bool,
}

impl From<GlProject> for Project {
    fn from(p: GlProject) -> Self {
        Self {
            id: p.id,
            name: p.name,
            path_with_namespace: p.path_with_namespace,
            merge_method: p
                .merge_method
                .as_deref()
                .map_or(MergeMethod::Merge, MergeMethod::from_api),
            only_allow_merge_if_pipeline_succeeds: p
                .only_allow_merge_if_pipeline_succeeds
                .unwrap_or(false),
            allow_merge_on_skipped_pipeline: p.allow_merge_on_skipped_pipeline.unwrap_or(false),
        }
    }
}

impl From<GlMergeRequest> for MergeRequest {
    fn from(mr: GlMergeRequest) -> Self {
        Self {
            iid: mr.iid,
            project_id: mr.project_id,
            title: mr.title,
            author: mr.author,
            assignee: mr.assignee,
            source_branch: mr.source_branch,
            target_branch: mr.target_branch,
            source_project_id: mr.source_project_id,
            target_project_id: mr.target_project_id,
            // older GitLab versions only report `work_in_progress`
            draft: mr.draft || mr.work_in_progress,
            blocking_discussions_resolved: mr.blocking_discussions_resolved.unwrap_or(true),
            state: MrState::from_api(&mr.state),
            sha: mr.sha,
            merge_status: mr
                .merge_status
                .as_deref()
                .map_or(MergeStatus::Unchecked, MergeStatus::from_api),
            rebase_in_progress: mr.rebase_in_progress,
            diverged_commits_count: mr.diverged_commits_count,
            web_url: mr.web_url,
        }
    }
}

#[derive(Serialize)]
struct CreateMrPayload<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
}

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Page size for paginated listings
const PAGE_SIZE: &str = "100";

impl GitLabService {
    /// Create a new GitLab service for the instance at `base_url`
    pub fn new(token: String, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Platform(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    fn mr_path(project_id: u64, iid: u64) -> String {
        format!("/projects/{project_id}/merge_requests/{iid}")
    }

    fn get(&self, endpoint: &str) -> RequestBuilder {
        self.client
            .get(self.api_url(endpoint))
            .header("PRIVATE-TOKEN", &self.token)
    }

    fn put(&self, endpoint: &str) -> RequestBuilder {
        self.client
            .put(self.api_url(endpoint))
            .header("PRIVATE-TOKEN", &self.token)
    }

    fn post(&self, endpoint: &str) -> RequestBuilder {
        self.client
            .post(self.api_url(endpoint))
            .header("PRIVATE-TOKEN", &self.token)
    }

    /// Send a request and turn non-success statuses into `Error::Api`.
    async fn send(request: RequestBuilder, endpoint: &str) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let raw = response.text().await.unwrap_or_default();
        // GitLab returns errors as {"message": ...} or {"error": ...}
        let body = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .map(|m| m.as_str().map_or_else(|| m.to_string(), String::from))
            })
            .unwrap_or(raw);

        Err(Error::Api {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder, endpoint: &str) -> Result<T> {
        Ok(Self::send(request, endpoint).await?.json().await?)
    }

    /// Fetch all pages of a listing, following `x-next-page`.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page = "1".to_string();

        loop {
            let request = self
                .get(endpoint)
                .query(query)
                .query(&[("page", page.as_str()), ("per_page", PAGE_SIZE)]);
            let response = Self::send(request, endpoint).await?;

            let next_page = response
                .headers()
                .get("x-next-page")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(ToString::to_string);

            let items: Vec<T> = response.json().await?;
            all.extend(items);

            match next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(all)
    }
}

#[async_trait]
impl PlatformService for GitLabService {
    async fn current_user(&self) -> Result<User> {
        debug!("fetching current user");
        let user: User = Self::send_json(self.get("/user"), "/user").await?;
        debug!(user_id = user.id, username = %user.username, "authenticated");
        Ok(user)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        debug!("listing projects");
        let query = [
            ("membership", "true".to_string()),
            ("archived", "false".to_string()),
        ];
        let projects: Vec<GlProject> = self.get_all_pages("/projects", &query).await?;
        debug!(count = projects.len(), "listed projects");
        Ok(projects.into_iter().map(Into::into).collect())
    }

    async fn get_project(&self, project_id: u64) -> Result<Project> {
        debug!(project_id, "getting project");
        let endpoint = format!("/projects/{project_id}");
        let project: GlProject = Self::send_json(self.get(&endpoint), &endpoint).await?;
        Ok(project.into())
    }

    async fn get_merge_request(
        &self,
        project_id: u64,
        iid: u64,
        include: MrInclude,
    ) -> Result<MergeRequest> {
        debug!(project_id, mr_iid = iid, ?include, "getting MR");
        let endpoint = Self::mr_path(project_id, iid);

        let mut request = self.get(&endpoint);
        if include.rebase_in_progress {
            request = request.query(&[("include_rebase_in_progress", "true")]);
        }
        if include.diverged_commits_count {
            request = request.query(&[("include_diverged_commits_count", "true")]);
        }

        let mr: GlMergeRequest = Self::send_json(request, &endpoint).await?;
        let mr: MergeRequest = mr.into();
        debug!(project_id, mr_iid = iid, state = %mr.state, "got MR");
        Ok(mr)
    }

    async fn list_merge_requests(
        &self,
        project_id: u64,
        assignee_id: u64,
        state: MrState,
    ) -> Result<Vec<MergeRequest>> {
        debug!(project_id, assignee_id, %state, "listing MRs");
        let endpoint = format!("/projects/{project_id}/merge_requests");
        let query = [
            ("assignee_id", assignee_id.to_string()),
            ("state", state.as_str().to_string()),
        ];
        let mrs: Vec<GlMergeRequest> = self.get_all_pages(&endpoint, &query).await?;
        debug!(project_id, count = mrs.len(), "listed MRs");
        Ok(mrs.into_iter().map(Into::into).collect())
    }

    async fn list_mr_pipelines(&self, project_id: u64, iid: u64) -> Result<Vec<Pipeline>> {
        debug!(project_id, mr_iid = iid, "listing MR pipelines");
        let endpoint = format!("{}/pipelines", Self::mr_path(project_id, iid));
        Self::send_json(self.get(&endpoint), &endpoint).await
    }

    async fn list_mr_notes(&self, project_id: u64, iid: u64, per_page: u32) -> Result<Vec<Note>> {
        debug!(project_id, mr_iid = iid, per_page, "listing MR notes");
        let endpoint = format!("{}/notes", Self::mr_path(project_id, iid));
        let request = self.get(&endpoint).query(&[
            ("per_page", per_page.to_string()),
            ("sort", "desc".to_string()),
            ("order_by", "created_at".to_string()),
        ]);

        let notes: Vec<GlNote> = Self::send_json(request, &endpoint).await?;
        let notes: Vec<Note> = notes
            .into_iter()
            .filter(|n| !n.system)
            .map(|n| Note {
                id: n.id,
                author: n.author,
                body: n.body,
                created_at: n.created_at,
            })
            .collect();
        debug!(project_id, mr_iid = iid, count = notes.len(), "listed MR notes");
        Ok(notes)
    }

    async fn create_mr_note(&self, project_id: u64, iid: u64, body: &str) -> Result<()> {
        debug!(project_id, mr_iid = iid, "creating MR note");
        let endpoint = format!("{}/notes", Self::mr_path(project_id, iid));
        let request = self.post(&endpoint).json(&serde_json::json!({ "body": body }));
        Self::send(request, &endpoint).await?;
        Ok(())
    }

    async fn rebase_mr(&self, project_id: u64, iid: u64, skip_ci: bool) -> Result<()> {
        debug!(project_id, mr_iid = iid, skip_ci, "rebasing MR");
        let endpoint = format!("{}/rebase", Self::mr_path(project_id, iid));
        let mut request = self.put(&endpoint);
        if skip_ci {
            request = request.query(&[("skip_ci", "true")]);
        }
        Self::send(request, &endpoint).await?;
        Ok(())
    }

    async fn merge_mr(&self, project_id: u64, iid: u64) -> Result<()> {
        debug!(project_id, mr_iid = iid, "merging MR");
        let endpoint = format!("{}/merge", Self::mr_path(project_id, iid));
        Self::send(self.put(&endpoint), &endpoint).await?;
        Ok(())
    }

    async fn set_mr_assignee(
        &self,
        project_id: u64,
        iid: u64,
        assignee_id: Option<u64>,
    ) -> Result<()> {
        debug!(project_id, mr_iid = iid, ?assignee_id, "changing MR assignee");
        let endpoint = Self::mr_path(project_id, iid);
        // assignee_id 0 unassigns
        let request = self
            .put(&endpoint)
            .json(&serde_json::json!({ "assignee_id": assignee_id.unwrap_or(0) }));
        Self::send(request, &endpoint).await?;
        Ok(())
    }

    async fn close_mr(&self, project_id: u64, iid: u64) -> Result<()> {
        debug!(project_id, mr_iid = iid, "closing MR");
        let endpoint = Self::mr_path(project_id, iid);
        let request = self
            .put(&endpoint)
            .json(&serde_json::json!({ "state_event": "close" }));
        Self::send(request, &endpoint).await?;
        Ok(())
    }

    async fn create_mr(&self, project_id: u64, mr: &NewMergeRequest) -> Result<MergeRequest> {
        debug!(project_id, source = %mr.source_branch, target = %mr.target_branch, "creating MR");
        let endpoint = format!("/projects/{project_id}/merge_requests");
        let payload = CreateMrPayload {
            source_branch: &mr.source_branch,
            target_branch: &mr.target_branch,
            title: &mr.title,
        };

        let created: GlMergeRequest =
            Self::send_json(self.post(&endpoint).json(&payload), &endpoint).await?;
        debug!(project_id, mr_iid = created.iid, "created MR");
        Ok(created.into())
    }

    async fn create_tag(&self, project_id: u64, tag_name: &str, git_ref: &str) -> Result<()> {
        debug!(project_id, tag_name, git_ref, "creating tag");
        let endpoint = format!("/projects/{project_id}/repository/tags");
        let request = self
            .post(&endpoint)
            .json(&serde_json::json!({ "tag_name": tag_name, "ref": git_ref }));
        Self::send(request, &endpoint).await?;
        Ok(())
    }

    async fn create_release(
        &self,
        project_id: u64,
        tag_name: &str,
        description: &str,
    ) -> Result<()> {
        debug!(project_id, tag_name, "creating release");
        let endpoint = format!("/projects/{project_id}/releases");
        let request = self.post(&endpoint).json(&serde_json::json!({
            "name": tag_name,
            "tag_name": tag_name,
            "description": description,
        }));
        Self::send(request, &endpoint).await?;
        Ok(())
    }
}

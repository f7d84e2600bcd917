//! Mock platform service for testing
//!
//! A small in-memory GitLab: merge requests, pipelines, and notes live in
//! maps, mutating calls change that state, and every call is recorded for
//! verification.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use merge_bot::error::{Error, Result};
use merge_bot::platform::PlatformService;
use merge_bot::types::{
    MergeMethod, MergeRequest, MergeStatus, MrInclude, MrState, NewMergeRequest, Note, Pipeline,
    PipelineStatus, Project, User,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// User ID of the bot identity
pub const BOT_ID: u64 = 100;

/// User ID of the default MR author
pub const AUTHOR_ID: u64 = 7;

/// Head commit of MRs built with [`make_mr`]
pub const HEAD_SHA: &str = "abc123";

type MrKey = (u64, u64);
type MrHook = Box<dyn FnMut(&mut MergeRequest) + Send>;

/// Call record for `rebase_mr`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebaseCall {
    pub project_id: u64,
    pub iid: u64,
    pub skip_ci: bool,
}

/// Call record for `create_mr_note`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteCall {
    pub project_id: u64,
    pub iid: u64,
    pub body: String,
}

/// Call record for `set_mr_assignee`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssigneeCall {
    pub project_id: u64,
    pub iid: u64,
    pub assignee_id: Option<u64>,
}

/// Call record for `create_tag` and `create_release`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCall {
    pub project_id: u64,
    pub tag_name: String,
    /// Git ref for tags, description for releases
    pub detail: String,
}

/// In-memory GitLab for testing
///
/// This manually implements `PlatformService` rather than using mockall,
/// because the lifecycle needs state that evolves across calls (a merge
/// flips the MR to merged, a rebase finishes after N polls, pipelines move
/// from pending to success).
///
/// Features:
/// - Auto-incrementing IIDs for MRs the bot opens
/// - Scripted pipeline listings, one step per call
/// - Rebases that stay in progress for a configurable number of polls
/// - Error injection for merges, project listing, and project fetches
pub struct MockPlatformService {
    bot: User,
    next_iid: AtomicU64,
    projects: Mutex<BTreeMap<u64, Project>>,
    merge_requests: Mutex<BTreeMap<MrKey, MergeRequest>>,
    pipeline_script: Mutex<HashMap<MrKey, VecDeque<Vec<Pipeline>>>>,
    notes: Mutex<HashMap<MrKey, Vec<Note>>>,
    rebase_remaining: Mutex<HashMap<MrKey, u32>>,
    rebase_polls: Mutex<u32>,
    pipeline_hook: Mutex<Option<MrHook>>,
    // Error injection
    error_on_merge: Mutex<Option<(u16, String)>>,
    error_on_list_projects: Mutex<Option<String>>,
    error_on_get_project: Mutex<HashSet<u64>>,
    // Call tracking
    merge_calls: Mutex<Vec<MrKey>>,
    rebase_calls: Mutex<Vec<RebaseCall>>,
    note_calls: Mutex<Vec<NoteCall>>,
    assignee_calls: Mutex<Vec<AssigneeCall>>,
    created_mrs: Mutex<Vec<(u64, NewMergeRequest)>>,
    closed_mrs: Mutex<Vec<MrKey>>,
    tag_calls: Mutex<Vec<TagCall>>,
    release_calls: Mutex<Vec<TagCall>>,
    pipeline_list_calls: AtomicUsize,
    get_project_calls: AtomicUsize,
}

impl Default for MockPlatformService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatformService {
    /// Create an empty GitLab with the bot user
    pub fn new() -> Self {
        Self {
            bot: User {
                id: BOT_ID,
                username: "merge-bot".to_string(),
            },
            next_iid: AtomicU64::new(1000),
            projects: Mutex::new(BTreeMap::new()),
            merge_requests: Mutex::new(BTreeMap::new()),
            pipeline_script: Mutex::new(HashMap::new()),
            notes: Mutex::new(HashMap::new()),
            rebase_remaining: Mutex::new(HashMap::new()),
            rebase_polls: Mutex::new(0),
            pipeline_hook: Mutex::new(None),
            error_on_merge: Mutex::new(None),
            error_on_list_projects: Mutex::new(None),
            error_on_get_project: Mutex::new(HashSet::new()),
            merge_calls: Mutex::new(Vec::new()),
            rebase_calls: Mutex::new(Vec::new()),
            note_calls: Mutex::new(Vec::new()),
            assignee_calls: Mutex::new(Vec::new()),
            created_mrs: Mutex::new(Vec::new()),
            closed_mrs: Mutex::new(Vec::new()),
            tag_calls: Mutex::new(Vec::new()),
            release_calls: Mutex::new(Vec::new()),
            pipeline_list_calls: AtomicUsize::new(0),
            get_project_calls: AtomicUsize::new(0),
        }
    }

    // === Setup ===

    /// Add or replace a project
    pub fn add_project(&self, project: Project) {
        self.projects.lock().unwrap().insert(project.id, project);
    }

    /// Remove a project from listings
    pub fn remove_project(&self, project_id: u64) {
        self.projects.lock().unwrap().remove(&project_id);
    }

    /// Add or replace a merge request
    pub fn add_mr(&self, mr: MergeRequest) {
        self.merge_requests
            .lock()
            .unwrap()
            .insert((mr.project_id, mr.iid), mr);
    }

    /// Mutate a stored merge request
    pub fn update_mr(&self, project_id: u64, iid: u64, f: impl FnOnce(&mut MergeRequest)) {
        let mut mrs = self.merge_requests.lock().unwrap();
        f(mrs.get_mut(&(project_id, iid)).expect("unknown MR"));
    }

    /// Snapshot of a stored merge request
    pub fn mr(&self, project_id: u64, iid: u64) -> MergeRequest {
        self.merge_requests.lock().unwrap()[&(project_id, iid)].clone()
    }

    /// Script successive `list_mr_pipelines` answers; the last one repeats
    pub fn script_pipelines(&self, project_id: u64, iid: u64, steps: Vec<Vec<Pipeline>>) {
        self.pipeline_script
            .lock()
            .unwrap()
            .insert((project_id, iid), steps.into());
    }

    /// Script a single pipeline per step, all on [`HEAD_SHA`]
    pub fn script_pipeline_statuses(&self, project_id: u64, iid: u64, statuses: &[PipelineStatus]) {
        let steps = statuses
            .iter()
            .map(|status| vec![make_pipeline(1, HEAD_SHA, *status)])
            .collect();
        self.script_pipelines(project_id, iid, steps);
    }

    /// Add a comment to an MR (listed newest first in insertion order)
    pub fn add_note(&self, project_id: u64, iid: u64, author_id: u64, body: &str) {
        let mut notes = self.notes.lock().unwrap();
        let list = notes.entry((project_id, iid)).or_default();
        let id = list.len() as u64 + 1;
        list.push(Note {
            id,
            author: User {
                id: author_id,
                username: format!("user{author_id}"),
            },
            body: body.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        });
    }

    /// Every rebase stays in progress for `polls` checks
    pub fn set_rebase_polls(&self, polls: u32) {
        *self.rebase_polls.lock().unwrap() = polls;
    }

    /// Run `hook` on the MR every time its pipelines are listed
    pub fn on_pipeline_list(&self, hook: impl FnMut(&mut MergeRequest) + Send + 'static) {
        *self.pipeline_hook.lock().unwrap() = Some(Box::new(hook));
    }

    // === Error injection methods ===

    /// Make `merge_mr` fail with an API error
    pub fn fail_merge(&self, status: u16, body: &str) {
        *self.error_on_merge.lock().unwrap() = Some((status, body.to_string()));
    }

    /// Make `list_projects` fail
    pub fn fail_list_projects(&self, msg: &str) {
        *self.error_on_list_projects.lock().unwrap() = Some(msg.to_string());
    }

    /// Let `list_projects` succeed again
    pub fn clear_list_projects_failure(&self) {
        *self.error_on_list_projects.lock().unwrap() = None;
    }

    /// Make `get_project` fail with a server error for one project
    pub fn fail_get_project(&self, project_id: u64) {
        self.error_on_get_project.lock().unwrap().insert(project_id);
    }

    /// Let `get_project` succeed again
    pub fn clear_get_project_failure(&self, project_id: u64) {
        self.error_on_get_project.lock().unwrap().remove(&project_id);
    }

    // === Call tracking accessors ===

    pub fn merge_calls(&self) -> Vec<MrKey> {
        self.merge_calls.lock().unwrap().clone()
    }

    pub fn rebase_calls(&self) -> Vec<RebaseCall> {
        self.rebase_calls.lock().unwrap().clone()
    }

    pub fn note_calls(&self) -> Vec<NoteCall> {
        self.note_calls.lock().unwrap().clone()
    }

    pub fn assignee_calls(&self) -> Vec<AssigneeCall> {
        self.assignee_calls.lock().unwrap().clone()
    }

    pub fn created_mrs(&self) -> Vec<(u64, NewMergeRequest)> {
        self.created_mrs.lock().unwrap().clone()
    }

    pub fn closed_mrs(&self) -> Vec<MrKey> {
        self.closed_mrs.lock().unwrap().clone()
    }

    pub fn tag_calls(&self) -> Vec<TagCall> {
        self.tag_calls.lock().unwrap().clone()
    }

    pub fn release_calls(&self) -> Vec<TagCall> {
        self.release_calls.lock().unwrap().clone()
    }

    pub fn pipeline_list_count(&self) -> usize {
        self.pipeline_list_calls.load(Ordering::SeqCst)
    }

    pub fn get_project_count(&self) -> usize {
        self.get_project_calls.load(Ordering::SeqCst)
    }

    fn not_found(endpoint: String) -> Error {
        Error::Api {
            status: 404,
            endpoint,
            body: "404 Not found".to_string(),
        }
    }

    fn with_mr<T>(&self, project_id: u64, iid: u64, f: impl FnOnce(&mut MergeRequest) -> T) -> Result<T> {
        let mut mrs = self.merge_requests.lock().unwrap();
        mrs.get_mut(&(project_id, iid))
            .map(f)
            .ok_or_else(|| Self::not_found(format!("/projects/{project_id}/merge_requests/{iid}")))
    }
}

#[async_trait]
impl PlatformService for MockPlatformService {
    async fn current_user(&self) -> Result<User> {
        Ok(self.bot.clone())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        if let Some(msg) = self.error_on_list_projects.lock().unwrap().as_ref() {
            return Err(Error::Platform(msg.clone()));
        }
        Ok(self.projects.lock().unwrap().values().cloned().collect())
    }

    async fn get_project(&self, project_id: u64) -> Result<Project> {
        self.get_project_calls.fetch_add(1, Ordering::SeqCst);
        if self.error_on_get_project.lock().unwrap().contains(&project_id) {
            return Err(Error::Api {
                status: 500,
                endpoint: format!("/projects/{project_id}"),
                body: "500 Internal Server Error".to_string(),
            });
        }
        self.projects
            .lock()
            .unwrap()
            .get(&project_id)
            .cloned()
            .ok_or_else(|| Self::not_found(format!("/projects/{project_id}")))
    }

    async fn get_merge_request(
        &self,
        project_id: u64,
        iid: u64,
        include: MrInclude,
    ) -> Result<MergeRequest> {
        let mut mr = self.with_mr(project_id, iid, |mr| mr.clone())?;

        mr.rebase_in_progress = if include.rebase_in_progress {
            let mut remaining = self.rebase_remaining.lock().unwrap();
            let left = remaining.entry((project_id, iid)).or_insert(0);
            let in_progress = *left > 0;
            *left = left.saturating_sub(1);
            Some(in_progress)
        } else {
            None
        };
        mr.diverged_commits_count = if include.diverged_commits_count {
            Some(mr.diverged_commits_count.unwrap_or(0))
        } else {
            None
        };
        Ok(mr)
    }

    async fn list_merge_requests(
        &self,
        project_id: u64,
        assignee_id: u64,
        state: MrState,
    ) -> Result<Vec<MergeRequest>> {
        Ok(self
            .merge_requests
            .lock()
            .unwrap()
            .values()
            .filter(|mr| mr.project_id == project_id && mr.state == state)
            .filter(|mr| mr.is_assigned_to(assignee_id))
            .cloned()
            .map(|mut mr| {
                mr.diverged_commits_count = None;
                mr
            })
            .collect())
    }

    async fn list_mr_pipelines(&self, project_id: u64, iid: u64) -> Result<Vec<Pipeline>> {
        self.pipeline_list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.pipeline_hook.lock().unwrap().as_mut() {
            self.with_mr(project_id, iid, hook)?;
        }

        let mut script = self.pipeline_script.lock().unwrap();
        let Some(steps) = script.get_mut(&(project_id, iid)) else {
            return Ok(Vec::new());
        };
        if steps.len() > 1 {
            Ok(steps.pop_front().unwrap_or_default())
        } else {
            Ok(steps.front().cloned().unwrap_or_default())
        }
    }

    async fn list_mr_notes(&self, project_id: u64, iid: u64, per_page: u32) -> Result<Vec<Note>> {
        Ok(self
            .notes
            .lock()
            .unwrap()
            .get(&(project_id, iid))
            .map(|notes| notes.iter().take(per_page as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn create_mr_note(&self, project_id: u64, iid: u64, body: &str) -> Result<()> {
        self.with_mr(project_id, iid, |_| ())?;
        self.note_calls.lock().unwrap().push(NoteCall {
            project_id,
            iid,
            body: body.to_string(),
        });
        Ok(())
    }

    async fn rebase_mr(&self, project_id: u64, iid: u64, skip_ci: bool) -> Result<()> {
        self.with_mr(project_id, iid, |mr| mr.diverged_commits_count = Some(0))?;
        let polls = *self.rebase_polls.lock().unwrap();
        self.rebase_remaining
            .lock()
            .unwrap()
            .insert((project_id, iid), polls);
        self.rebase_calls.lock().unwrap().push(RebaseCall {
            project_id,
            iid,
            skip_ci,
        });
        Ok(())
    }

    async fn merge_mr(&self, project_id: u64, iid: u64) -> Result<()> {
        self.merge_calls.lock().unwrap().push((project_id, iid));
        if let Some((status, body)) = self.error_on_merge.lock().unwrap().clone() {
            return Err(Error::Api {
                status,
                endpoint: format!("/projects/{project_id}/merge_requests/{iid}/merge"),
                body,
            });
        }
        self.with_mr(project_id, iid, |mr| mr.state = MrState::Merged)
    }

    async fn set_mr_assignee(
        &self,
        project_id: u64,
        iid: u64,
        assignee_id: Option<u64>,
    ) -> Result<()> {
        self.with_mr(project_id, iid, |mr| {
            mr.assignee = assignee_id.map(|id| User {
                id,
                username: format!("user{id}"),
            });
        })?;
        self.assignee_calls.lock().unwrap().push(AssigneeCall {
            project_id,
            iid,
            assignee_id,
        });
        Ok(())
    }

    async fn close_mr(&self, project_id: u64, iid: u64) -> Result<()> {
        self.with_mr(project_id, iid, |mr| mr.state = MrState::Closed)?;
        self.closed_mrs.lock().unwrap().push((project_id, iid));
        Ok(())
    }

    async fn create_mr(&self, project_id: u64, new_mr: &NewMergeRequest) -> Result<MergeRequest> {
        let iid = self.next_iid.fetch_add(1, Ordering::SeqCst);
        let mut mr = make_mr(project_id, iid);
        mr.title.clone_from(&new_mr.title);
        mr.source_branch.clone_from(&new_mr.source_branch);
        mr.target_branch.clone_from(&new_mr.target_branch);
        mr.author = self.bot.clone();
        mr.assignee = None;
        mr.sha = Some(format!("temp-{iid}"));

        self.add_mr(mr.clone());
        self.created_mrs
            .lock()
            .unwrap()
            .push((project_id, new_mr.clone()));
        Ok(mr)
    }

    async fn create_tag(&self, project_id: u64, tag_name: &str, git_ref: &str) -> Result<()> {
        self.tag_calls.lock().unwrap().push(TagCall {
            project_id,
            tag_name: tag_name.to_string(),
            detail: git_ref.to_string(),
        });
        Ok(())
    }

    async fn create_release(
        &self,
        project_id: u64,
        tag_name: &str,
        description: &str,
    ) -> Result<()> {
        self.release_calls.lock().unwrap().push(TagCall {
            project_id,
            tag_name: tag_name.to_string(),
            detail: description.to_string(),
        });
        Ok(())
    }
}

/// Project with the plain merge method that requires CI
pub fn make_project(id: u64) -> Project {
    Project {
        id,
        name: format!("project-{id}"),
        path_with_namespace: format!("group/project-{id}"),
        merge_method: MergeMethod::Merge,
        only_allow_merge_if_pipeline_succeeds: true,
        allow_merge_on_skipped_pipeline: false,
    }
}

/// Open, mergeable MR `feature -> main` by [`AUTHOR_ID`], assigned to the bot
pub fn make_mr(project_id: u64, iid: u64) -> MergeRequest {
    MergeRequest {
        iid,
        project_id,
        title: format!("MR {iid}"),
        author: User {
            id: AUTHOR_ID,
            username: "alice".to_string(),
        },
        assignee: Some(User {
            id: BOT_ID,
            username: "merge-bot".to_string(),
        }),
        source_branch: "feature".to_string(),
        target_branch: "main".to_string(),
        source_project_id: project_id,
        target_project_id: project_id,
        draft: false,
        blocking_discussions_resolved: true,
        state: MrState::Opened,
        sha: Some(HEAD_SHA.to_string()),
        merge_status: MergeStatus::CanBeMerged,
        rebase_in_progress: None,
        diverged_commits_count: None,
        web_url: format!("https://gitlab.example.com/group/project-{project_id}/-/merge_requests/{iid}"),
    }
}

/// Pipeline helper
pub fn make_pipeline(id: u64, sha: &str, status: PipelineStatus) -> Pipeline {
    Pipeline {
        id,
        sha: sha.to_string(),
        status,
    }
}

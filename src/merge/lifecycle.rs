//! Merge request lifecycle - effectful sequencing
//!
//! Drives one MR through
//!
//! ```text
//! Validate -> RebaseIfNeeded -> WaitPipeline -> WaitMergeCheck ->
//! Revalidate -> Merge -> WaitMergeComplete -> PostMergeRebase -> MaybeTag
//! ```
//!
//! Any recoverable failure jumps to Abort: the MR is handed back to its
//! author with a comment explaining why. Non-recoverable failures propagate
//! to the project worker untouched.

use crate::context::BotContext;
use crate::error::{Error, Result};
use crate::merge::poll::{PollPolicy, poll_until};
use crate::merge::tag::{is_tag_request, parse_tag_request};
use crate::merge::validate::ensure_mergeable;
use crate::platform::PlatformService;
use crate::types::{
    MergeRequest, MrInclude, MrState, NewMergeRequest, Outcome, Pipeline, PipelineStatus, Project,
    TagRequest,
};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// How many recent comments are scanned for tag requests
const TAG_SCAN_DEPTH: u32 = 50;

/// Delay between rebase and merge-completion checks
const SHORT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Delay between `merge_status` checks
const MERGE_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Pipeline checks start at 5s and back off by 5s up to a minute
const PIPELINE_POLL_INITIAL: Duration = Duration::from_secs(5);
const PIPELINE_POLL_STEP: Duration = Duration::from_secs(5);
const PIPELINE_POLL_MAX: Duration = Duration::from_secs(60);

/// Lifecycle stage, used for logging where an MR failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Initial mergeability check
    Validate,
    /// Rebase for fast-forward style projects
    RebaseIfNeeded,
    /// Wait for CI on the current head
    WaitPipeline,
    /// Wait for GitLab's mergeability check
    WaitMergeCheck,
    /// Mergeability check right before merging
    Revalidate,
    /// Issue the merge
    Merge,
    /// Wait for the MR to report `merged`
    WaitMergeComplete,
    /// Rebase the source branch onto the new target history
    PostMergeRebase,
    /// Create tags requested in comments
    MaybeTag,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validate => "validate",
            Self::RebaseIfNeeded => "rebase-if-needed",
            Self::WaitPipeline => "wait-pipeline",
            Self::WaitMergeCheck => "wait-merge-check",
            Self::Revalidate => "revalidate",
            Self::Merge => "merge",
            Self::WaitMergeComplete => "wait-merge-complete",
            Self::PostMergeRebase => "post-merge-rebase",
            Self::MaybeTag => "maybe-tag",
        };
        f.write_str(s)
    }
}

/// Land one merge request
///
/// Returns `Outcome::Aborted` for recoverable failures after unassigning
/// and commenting; returns `Err` for everything that must stop the worker.
#[instrument(skip(ctx, project), fields(project_id = project.id, mr_iid = iid))]
pub async fn process_merge_request(ctx: &BotContext, project: &Project, iid: u64) -> Result<Outcome> {
    MergeRequestLifecycle::new(ctx, project, iid).run().await
}

/// User-facing reason for a merge API status the bot can recover from
pub const fn merge_refusal_reason(status: u16) -> Option<&'static str> {
    match status {
        405 => Some(
            "cannot merge because one of Draft, Closed, Pipeline Pending Completion, or Failed while requiring Success",
        ),
        406 => Some("cannot merge because of a conflict"),
        409 => Some("cannot merge because of the sha parameter is passed and does not match the HEAD"),
        401 => Some("cannot merge because you dont have permission to merge"),
        _ => None,
    }
}

/// Decide whether CI allows merging (PURE)
///
/// `Ok(true)` proceeds, `Ok(false)` keeps waiting, `Err` aborts.
pub fn pipeline_gate(pipeline: Option<&Pipeline>, allow_skipped: bool) -> Result<bool> {
    let Some(pipeline) = pipeline else {
        return Ok(false);
    };

    match pipeline.status {
        PipelineStatus::Success => Ok(true),
        PipelineStatus::Skipped if allow_skipped => Ok(true),
        PipelineStatus::Skipped => Err(Error::PolicyViolation(
            "Sorry, the pipeline was skipped and this project requires a successful one!"
                .to_string(),
        )),
        PipelineStatus::Failed | PipelineStatus::Canceled => Err(Error::PolicyViolation(format!(
            "Sorry, pipeline {} did not succeed (status: {})!",
            pipeline.id, pipeline.status
        ))),
        _ => Ok(false),
    }
}

/// Most recent pipeline that ran for `sha`
pub fn current_pipeline<'p>(pipelines: &'p [Pipeline], sha: Option<&str>) -> Option<&'p Pipeline> {
    let sha = sha?;
    pipelines.iter().find(|p| p.sha == sha)
}

/// State machine for a single MR
struct MergeRequestLifecycle<'a> {
    ctx: &'a BotContext,
    project: &'a Project,
    iid: u64,
    stage: Stage,
}

impl<'a> MergeRequestLifecycle<'a> {
    /// Prepare the lifecycle for MR `iid` of `project`
    const fn new(ctx: &'a BotContext, project: &'a Project, iid: u64) -> Self {
        Self {
            ctx,
            project,
            iid,
            stage: Stage::Validate,
        }
    }

    /// Run to completion
    async fn run(mut self) -> Result<Outcome> {
        match self.drive().await {
            Ok(tags) => {
                info!(?tags, "merge request landed");
                Ok(Outcome::Merged { tags })
            }
            Err(e) if e.is_recoverable() => {
                let reason = e.to_string();
                warn!(stage = %self.stage, %reason, "aborting merge request");
                self.abort(&reason).await?;
                Ok(Outcome::Aborted { reason })
            }
            Err(e) => {
                error!(stage = %self.stage, error = %e, "non-recoverable failure");
                Err(e)
            }
        }
    }

    fn enter(&mut self, stage: Stage) {
        info!(%stage, "entering stage");
        self.stage = stage;
    }

    async fn drive(&mut self) -> Result<Vec<String>> {
        self.enter(Stage::Validate);
        self.validate().await?;

        self.enter(Stage::RebaseIfNeeded);
        self.rebase_if_needed().await?;

        self.enter(Stage::WaitPipeline);
        self.wait_for_pipeline_if_needed().await?;

        self.enter(Stage::WaitMergeCheck);
        self.wait_for_merge_check().await?;

        // rebasing and CI can take minutes; assignment or drafts may have changed
        self.enter(Stage::Revalidate);
        self.validate().await?;

        self.enter(Stage::Merge);
        self.accept_merge().await?;

        self.enter(Stage::WaitMergeComplete);
        self.wait_for_merged().await?;

        self.enter(Stage::PostMergeRebase);
        self.rebase_source_branch().await?;

        self.enter(Stage::MaybeTag);
        self.create_tags_if_requested().await
    }

    fn platform(&self) -> &'a dyn PlatformService {
        self.ctx.platform.as_ref()
    }

    async fn fetch(&self, include: MrInclude) -> Result<MergeRequest> {
        self.platform()
            .get_merge_request(self.project.id, self.iid, include)
            .await
    }

    async fn validate(&self) -> Result<()> {
        let mr = self.fetch(MrInclude::NONE).await?;
        ensure_mergeable(&mr, &self.ctx.config, self.ctx.bot_user_id)
    }

    async fn rebase_if_needed(&self) -> Result<()> {
        if !self.project.merge_method.requires_rebase() {
            return Ok(());
        }

        let mr = self.fetch(MrInclude::DIVERGED).await?;
        let diverged = mr.diverged_commits_count.unwrap_or(0);
        if diverged == 0 {
            return Ok(());
        }

        info!(diverged, "need rebase");
        self.platform()
            .rebase_mr(self.project.id, self.iid, false)
            .await?;
        self.wait_for_rebase(self.iid).await
    }

    async fn wait_for_rebase(&self, iid: u64) -> Result<()> {
        let platform = self.platform();
        let project_id = self.project.id;
        let policy = PollPolicy::fixed(SHORT_POLL_INTERVAL, self.ctx.config.timing.rebase_timeout())
            .with_initial_delay();

        poll_until(
            &policy,
            "Rebasing timed out",
            move || platform.get_merge_request(project_id, iid, MrInclude::REBASE),
            |mr| {
                let in_progress = mr.rebase_in_progress.unwrap_or(false);
                if in_progress {
                    info!(mr_iid = iid, "waiting for rebase to be done");
                }
                Ok(!in_progress)
            },
        )
        .await?;
        Ok(())
    }

    async fn wait_for_pipeline_if_needed(&self) -> Result<()> {
        if !self.project.only_allow_merge_if_pipeline_succeeds {
            debug!("project does not require a pipeline");
            return Ok(());
        }

        info!("checking pipeline status");
        let platform = self.platform();
        let (project_id, iid) = (self.project.id, self.iid);
        let allow_skipped = self.project.allow_merge_on_skipped_pipeline;
        let policy = PollPolicy::backoff(
            PIPELINE_POLL_INITIAL,
            PIPELINE_POLL_STEP,
            PIPELINE_POLL_MAX,
            self.ctx.config.timing.pipeline_timeout(),
        );

        poll_until(
            &policy,
            "Pipeline timed out",
            move || async move {
                // the head may move (e.g. after a rebase), so re-read it every time
                let mr = platform
                    .get_merge_request(project_id, iid, MrInclude::NONE)
                    .await?;
                let pipelines = platform.list_mr_pipelines(project_id, iid).await?;
                Ok::<_, Error>(current_pipeline(&pipelines, mr.sha.as_deref()).cloned())
            },
            |pipeline| {
                let ready = pipeline_gate(pipeline.as_ref(), allow_skipped)?;
                if !ready {
                    match pipeline {
                        Some(p) => {
                            info!(status = %p.status, pipeline_id = p.id, "waiting for ci to be done");
                        }
                        None => info!("waiting for a pipeline on the current commit"),
                    }
                }
                Ok(ready)
            },
        )
        .await?;
        Ok(())
    }

    async fn wait_for_merge_check(&self) -> Result<()> {
        let platform = self.platform();
        let (project_id, iid) = (self.project.id, self.iid);
        let policy = PollPolicy::fixed(
            MERGE_STATUS_POLL_INTERVAL,
            self.ctx.config.timing.merge_status_timeout(),
        );

        // the resulting status is not judged here; the merge call is the authority
        poll_until(
            &policy,
            "Merge status check timed out",
            move || platform.get_merge_request(project_id, iid, MrInclude::NONE),
            |mr| {
                let pending = mr.merge_status.is_pending();
                if pending {
                    info!("waiting for merge_status to be calculated");
                }
                Ok(!pending)
            },
        )
        .await?;
        Ok(())
    }

    async fn accept_merge(&self) -> Result<()> {
        info!("start merging");
        let Err(err) = self.platform().merge_mr(self.project.id, self.iid).await else {
            return Ok(());
        };

        if let Error::Api { status, body, .. } = &err {
            error!(status, %body, "merge error");
            if let Some(reason) = merge_refusal_reason(*status) {
                return Err(Error::MergeRefused(reason.to_string()));
            }
        }
        Err(err)
    }

    async fn wait_for_merged(&self) -> Result<()> {
        let platform = self.platform();
        let (project_id, iid) = (self.project.id, self.iid);
        let policy = PollPolicy::fixed(SHORT_POLL_INTERVAL, self.ctx.config.timing.merge_timeout())
            .with_initial_delay();

        poll_until(
            &policy,
            "Merging timed out",
            move || platform.get_merge_request(project_id, iid, MrInclude::NONE),
            |mr| {
                let merged = mr.state == MrState::Merged;
                if !merged {
                    info!(state = %mr.state, "waiting for merge to be done");
                }
                Ok(merged)
            },
        )
        .await?;
        info!("merged");
        Ok(())
    }

    /// Rebase the merged source branch onto the target through a throwaway MR
    async fn rebase_source_branch(&self) -> Result<()> {
        info!("moving merge commit to source branch by rebasing");
        let merged = self.fetch(MrInclude::NONE).await?;

        let temp = self
            .platform()
            .create_mr(
                self.project.id,
                &NewMergeRequest {
                    title: format!(
                        "rebasing branch {} into {}",
                        merged.source_branch, merged.target_branch
                    ),
                    source_branch: merged.source_branch,
                    target_branch: merged.target_branch,
                },
            )
            .await?;

        self.platform()
            .rebase_mr(self.project.id, temp.iid, true)
            .await?;
        info!(temp_mr_iid = temp.iid, "source branch rebase started");

        self.wait_for_rebase(temp.iid).await?;
        self.platform().close_mr(self.project.id, temp.iid).await?;
        info!(temp_mr_iid = temp.iid, "source branch rebasing finished");
        Ok(())
    }

    async fn create_tags_if_requested(&self) -> Result<Vec<String>> {
        let mr = self.fetch(MrInclude::NONE).await?;
        let notes = self
            .platform()
            .list_mr_notes(self.project.id, self.iid, TAG_SCAN_DEPTH)
            .await?;

        // parse everything first so a malformed request creates no tags at all
        let requests = notes
            .iter()
            .filter(|n| n.author.id != self.ctx.bot_user_id)
            .filter(|n| self.ctx.config.is_authorized(self.project.id, n.author.id))
            .filter(|n| is_tag_request(&n.body))
            .map(|n| parse_tag_request(&n.body))
            .collect::<Result<Vec<TagRequest>>>()?;

        let mut created = Vec::with_capacity(requests.len());
        for request in requests {
            info!(tag = %request.tag_name, "tag requested");
            self.platform()
                .create_tag(self.project.id, &request.tag_name, &mr.target_branch)
                .await?;
            self.platform()
                .create_release(
                    self.project.id,
                    &request.tag_name,
                    &request.release_description(),
                )
                .await?;
            info!(tag = %request.tag_name, "created tag and release");
            created.push(request.tag_name);
        }
        Ok(created)
    }

    /// Hand the MR back to a human with the failure reason
    async fn abort(&self, reason: &str) -> Result<()> {
        let mr = self.fetch(MrInclude::NONE).await?;
        let assignee = if mr.author.id == self.ctx.bot_user_id {
            None
        } else {
            Some(mr.author.id)
        };

        self.platform()
            .set_mr_assignee(self.project.id, self.iid, assignee)
            .await?;
        self.platform()
            .create_mr_note(self.project.id, self.iid, reason)
            .await
    }
}

//! Per-project worker loop
//!
//! Each monitored project gets one worker. A worker handles its assigned MRs
//! strictly one at a time, then sleeps and looks again. Waiting on one MR's
//! pipeline never blocks another project's worker.

use crate::context::BotContext;
use crate::error::Result;
use crate::merge::process_merge_request;
use crate::types::{MrState, Outcome, Project};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Run the worker for `project` until cancelled or a non-recoverable error
///
/// Cancellation returns `Ok(())`. A non-recoverable error is logged and
/// returned; the supervisor notices the finished task and restarts it on
/// its next discovery pass.
#[instrument(skip_all, fields(project_id = project.id, project = %project.path_with_namespace))]
pub async fn run_project_worker(
    ctx: BotContext,
    project: Project,
    cancel: CancellationToken,
) -> Result<()> {
    info!("worker started");

    let result = tokio::select! {
        () = cancel.cancelled() => {
            info!("worker cancelled");
            Ok(())
        }
        res = worker_loop(&ctx, project.id) => res,
    };

    if let Err(e) = &result {
        error!(error = %e, "worker stopped");
    }
    result
}

async fn worker_loop(ctx: &BotContext, project_id: u64) -> Result<()> {
    loop {
        process_assigned_merge_requests(ctx, project_id).await?;
        sleep(ctx.config.timing.worker_interval()).await;
    }
}

/// One worker pass: process every open MR currently assigned to the bot
///
/// The project is re-fetched so merge settings changed in GitLab apply to
/// the next MR. MRs are processed sequentially in listing order.
pub async fn process_assigned_merge_requests(
    ctx: &BotContext,
    project_id: u64,
) -> Result<Vec<(u64, Outcome)>> {
    let project = ctx.platform.get_project(project_id).await?;
    let assigned = ctx
        .platform
        .list_merge_requests(project_id, ctx.bot_user_id, MrState::Opened)
        .await?;

    // the listing filter is server-side; confirm before acting on it
    let assigned: Vec<_> = assigned
        .into_iter()
        .filter(|mr| mr.is_assigned_to(ctx.bot_user_id))
        .collect();
    debug!(count = assigned.len(), "assigned merge requests");

    let mut outcomes = Vec::with_capacity(assigned.len());
    for mr in assigned {
        info!(mr_iid = mr.iid, title = %mr.title, "start processing merge request");
        let outcome = process_merge_request(ctx, &project, mr.iid).await?;
        outcomes.push((mr.iid, outcome));
    }
    Ok(outcomes)
}

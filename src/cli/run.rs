//! Run modes - supervise forever, or a single pass

use merge_bot::context::BotContext;
use merge_bot::error::{Error, Result};
use merge_bot::monitor::{Supervisor, process_assigned_merge_requests};
use merge_bot::types::Outcome;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Monitor all projects until Ctrl-C
pub async fn run_bot(ctx: BotContext) {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            return;
        }
        info!("received Ctrl-C, shutting down");
        trigger.cancel();
    });

    let mut supervisor = Supervisor::new(ctx);
    supervisor.run(shutdown).await;
    info!("bot stopped");
}

/// Process every project's assigned MRs once, then return
///
/// Projects are handled one after another. A project that fails does not
/// stop the pass; the pass as a whole fails if any project did.
pub async fn run_once(ctx: &BotContext) -> Result<()> {
    let projects = ctx.platform.list_projects().await?;
    let mut failed = 0usize;

    for project in &projects {
        match process_assigned_merge_requests(ctx, project.id).await {
            Ok(outcomes) => {
                for (iid, outcome) in outcomes {
                    match outcome {
                        Outcome::Merged { tags } => {
                            info!(project = %project.path_with_namespace, mr_iid = iid, ?tags, "merged");
                        }
                        Outcome::Aborted { reason } => {
                            warn!(project = %project.path_with_namespace, mr_iid = iid, %reason, "aborted");
                        }
                    }
                }
            }
            Err(e) => {
                error!(project = %project.path_with_namespace, error = %e, "project pass failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(Error::Platform(format!(
            "{failed} of {} project(s) failed",
            projects.len()
        )));
    }
    Ok(())
}

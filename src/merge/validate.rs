//! Mergeability validation - pure checks over a fetched MR
//!
//! No I/O happens here. The lifecycle fetches a fresh MR and hands it in,
//! once before rebasing and once more right before merging.

use crate::config::BotConfig;
use crate::error::{Error, Result};
use crate::types::{MergeRequest, MrState};

/// Check that the bot may merge `mr` (PURE)
///
/// Rules are checked in a fixed order and the first violation wins. An MR
/// that is already merged or closed yields the non-recoverable
/// `Error::AlreadyFinished`; every other violation is a recoverable
/// `Error::PolicyViolation` whose text is posted on the MR.
pub fn ensure_mergeable(mr: &MergeRequest, config: &BotConfig, bot_user_id: u64) -> Result<()> {
    if !config.is_authorized(mr.project_id, mr.author.id) {
        return Err(violation(
            "Sorry, you dont have permission to merge this project!",
        ));
    }

    if !config.is_trunk(&mr.target_branch) {
        return Err(violation(&format!(
            "As a security check I only accept merge requests to {}",
            config.trunk_branches.join(" or ")
        )));
    }

    if mr.source_project_id != mr.target_project_id {
        return Err(violation("Sorry, Cant merge to different project!"));
    }

    if mr.draft {
        return Err(violation(
            "Sorry, I can't merge requests marked as Work-In-Progress!",
        ));
    }

    if !mr.blocking_discussions_resolved {
        return Err(violation(
            "Sorry, I can't merge requests which have unresolved discussions!",
        ));
    }

    match &mr.state {
        MrState::Opened => {}
        MrState::Merged | MrState::Closed => return Err(Error::AlreadyFinished(mr.state.clone())),
        other => {
            return Err(violation(&format!(
                "The merge request is in an unknown state: {other}"
            )));
        }
    }

    if !mr.is_assigned_to(bot_user_id) {
        return Err(violation("It is not assigned to me anymore!"));
    }

    Ok(())
}

fn violation(reason: &str) -> Error {
    Error::PolicyViolation(reason.to_string())
}

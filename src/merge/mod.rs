//! Merge engine for a single merge request
//!
//! Split the same way throughout:
//! 1. Validate - decide whether the bot may merge (pure, testable)
//! 2. Lifecycle - rebase, wait, merge, tag (effectful)
//! 3. Poll - the one waiting primitive every wait step goes through

mod lifecycle;
mod poll;
mod tag;
mod validate;

pub use lifecycle::{current_pipeline, merge_refusal_reason, pipeline_gate, process_merge_request};
pub use poll::{PollPolicy, poll_until};
pub use tag::{TAG_PREFIX, is_tag_request, parse_tag_request};
pub use validate::ensure_mergeable;

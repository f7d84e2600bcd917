//! gitlab-merge-bot: a GitLab merge bot
//!
//! Watches every project the bot user can see. When a merge request is
//! assigned to the bot, it validates the request, rebases it if the project
//! merges fast-forward style, waits for CI, merges, moves the source branch
//! onto the new target history, and creates tags and releases requested in
//! comments. Anything it cannot do is handed back to the author with a
//! comment.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod merge;
pub mod monitor;
pub mod platform;
pub mod types;

pub use error::{Error, Result};

//! Project monitoring
//!
//! A supervisor discovers projects and runs one worker per project.

mod supervisor;
mod worker;

pub use supervisor::{ReconcileReport, Supervisor};
pub use worker::{process_assigned_merge_requests, run_project_worker};

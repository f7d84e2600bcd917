//! Project discovery and worker supervision
//!
//! The supervisor owns every worker task. Each discovery pass lists the
//! projects visible to the bot, reaps workers that died, stops workers for
//! projects that vanished, and starts workers for projects it does not
//! monitor yet. A dead worker is reaped before new projects are matched, so
//! it is restarted within the same pass.

use crate::context::BotContext;
use crate::error::Result;
use crate::monitor::worker::run_project_worker;
use crate::types::Project;
use std::collections::{HashMap, HashSet};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one discovery pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Projects whose worker was started
    pub started: Vec<u64>,
    /// Projects whose worker was stopped because the project vanished
    pub stopped: Vec<u64>,
    /// Projects whose worker had finished on its own
    pub reaped: Vec<u64>,
}

impl ReconcileReport {
    /// Whether the pass changed anything
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.reaped.is_empty()
    }
}

struct WorkerHandle {
    project_name: String,
    cancel: CancellationToken,
    join: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    async fn stop(self, project_id: u64) {
        self.cancel.cancel();
        match self.join.await {
            Ok(Ok(())) => debug!(project_id, project = %self.project_name, "worker stopped"),
            Ok(Err(e)) => {
                warn!(project_id, project = %self.project_name, error = %e, "worker failed while stopping");
            }
            Err(e) => warn!(project_id, project = %self.project_name, error = %e, "worker task panicked"),
        }
    }
}

/// Owns the project workers
pub struct Supervisor {
    ctx: BotContext,
    workers: HashMap<u64, WorkerHandle>,
}

impl Supervisor {
    /// Create a supervisor that monitors nothing yet
    pub fn new(ctx: BotContext) -> Self {
        Self {
            ctx,
            workers: HashMap::new(),
        }
    }

    /// IDs of projects with a worker, sorted
    pub fn monitored_projects(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Whether the worker for `project_id` exists and has not finished
    pub fn is_running(&self, project_id: u64) -> bool {
        self.workers
            .get(&project_id)
            .is_some_and(|w| !w.join.is_finished())
    }

    /// One discovery pass
    ///
    /// Fails only when the project listing fails; the worker set is left
    /// untouched in that case.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport> {
        let projects = self.ctx.platform.list_projects().await?;
        let mut report = ReconcileReport::default();

        self.reap_finished(&mut report).await;

        let visible: HashSet<u64> = projects.iter().map(|p| p.id).collect();
        let vanished: Vec<u64> = self
            .workers
            .keys()
            .filter(|id| !visible.contains(id))
            .copied()
            .collect();
        for project_id in vanished {
            if let Some(handle) = self.workers.remove(&project_id) {
                info!(project_id, project = %handle.project_name, "stop monitoring project");
                handle.stop(project_id).await;
                report.stopped.push(project_id);
            }
        }

        for project in projects {
            if !self.workers.contains_key(&project.id) {
                report.started.push(project.id);
                self.spawn(project);
            }
        }

        Ok(report)
    }

    async fn reap_finished(&mut self, report: &mut ReconcileReport) {
        let finished: Vec<u64> = self
            .workers
            .iter()
            .filter(|(_, w)| w.join.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for project_id in finished {
            let Some(handle) = self.workers.remove(&project_id) else {
                continue;
            };
            match handle.join.await {
                Ok(Ok(())) => info!(project_id, project = %handle.project_name, "worker exited"),
                Ok(Err(e)) => {
                    warn!(project_id, project = %handle.project_name, error = %e, "reaping failed worker");
                }
                Err(e) => {
                    warn!(project_id, project = %handle.project_name, error = %e, "reaping panicked worker");
                }
            }
            report.reaped.push(project_id);
        }
    }

    fn spawn(&mut self, project: Project) {
        info!(project_id = project.id, project = %project.path_with_namespace, "start monitoring project");
        let project_id = project.id;
        let project_name = project.path_with_namespace.clone();
        let cancel = CancellationToken::new();
        let join = tokio::spawn(run_project_worker(
            self.ctx.clone(),
            project,
            cancel.clone(),
        ));

        self.workers.insert(
            project_id,
            WorkerHandle {
                project_name,
                cancel,
                join,
            },
        );
    }

    /// Discover projects every `discovery_interval` until `shutdown` fires
    ///
    /// A failed discovery pass is logged and retried on the next tick.
    /// All workers are stopped before returning.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let interval = self.ctx.config.timing.discovery_interval();
        loop {
            match self.reconcile().await {
                Ok(report) if report.is_empty() => debug!("no project changes"),
                Ok(report) => info!(
                    started = ?report.started,
                    stopped = ?report.stopped,
                    reaped = ?report.reaped,
                    "projects reconciled"
                ),
                Err(e) => error!(error = %e, "project discovery failed"),
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = sleep(interval) => {}
            }
        }

        self.shutdown().await;
    }

    /// Cancel every worker and wait for them to finish
    pub async fn shutdown(&mut self) {
        info!(workers = self.workers.len(), "shutting down workers");
        for (project_id, handle) in self.workers.drain() {
            handle.stop(project_id).await;
        }
    }
}

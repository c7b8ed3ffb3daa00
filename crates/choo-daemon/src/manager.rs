//! Job Manager (spec.md §4.7): process-wide coordination of concurrent
//! jobs. Grounded on `control-plane`'s service-struct-over-a-shared-store
//! shape (`services/session.rs`) and `durable`'s supervised-task-per-job
//! idiom.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use choo_eventbus::EventBus;
use choo_github::GithubClient;
use choo_gitops::{BranchGuard, GitRepo, SafetyConfig};
use choo_persistence::{PersistenceStore, RunRecord};
use choo_scheduler::Scheduler;
use choo_types::{Job, JobConfig, JobStatus, Unit, UnitStatus};
use choo_worker::{Escalator, ProviderFactory, WorkerConfig, WorkerPool};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::ManagerError;
use crate::orchestrator::{Orchestrator, OrchestratorOutcome};

struct ActiveJob {
    bus: EventBus,
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    repo_path: PathBuf,
    // Held for the job's lifetime: dropping a `Subscription` unsubscribes
    // it immediately, which would silently stop event persistence.
    _persist_sub: choo_eventbus::Subscription,
}

/// Process-wide coordinator of concurrent jobs. One instance per daemon.
pub struct JobManager {
    default_parallelism: usize,
    event_buffer_capacity: usize,
    review_poll_interval: Duration,
    review_deadline: Duration,
    store: Arc<dyn PersistenceStore>,
    github: Arc<dyn GithubClient>,
    provider_factory: ProviderFactory,
    escalator: Arc<dyn Escalator>,
    active: Mutex<HashMap<String, ActiveJob>>,
    shutting_down: Mutex<bool>,
}

impl JobManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &crate::config::DaemonConfig,
        store: Arc<dyn PersistenceStore>,
        github: Arc<dyn GithubClient>,
        provider_factory: ProviderFactory,
        escalator: Arc<dyn Escalator>,
    ) -> Self {
        Self {
            default_parallelism: cfg.default_parallelism,
            event_buffer_capacity: cfg.event_buffer_capacity,
            review_poll_interval: cfg.review_poll_interval,
            review_deadline: cfg.review_deadline,
            store,
            github,
            provider_factory,
            escalator,
            active: Mutex::new(HashMap::new()),
            shutting_down: Mutex::new(false),
        }
    }

    /// Validates `cfg`, persists a run record, constructs and launches an
    /// Orchestrator in a supervised task, and returns the new job's id.
    pub async fn start(self: &Arc<Self>, mut cfg: JobConfig) -> Result<String, ManagerError> {
        if *self.shutting_down.lock().unwrap() {
            return Err(ManagerError::Unavailable);
        }
        cfg.validate().map_err(ManagerError::InvalidArgument)?;
        if cfg.parallelism == 0 {
            cfg.parallelism = self.default_parallelism;
        }

        let job_id = Uuid::now_v7().to_string();
        let (feature_branch, repo_path) = cfg.identity_key(&job_id);

        if self.store.get_run_by_branch(&feature_branch, &repo_path).await?.is_some() {
            return Err(ManagerError::DuplicateRun);
        }

        let mut units = choo_discovery::discover(&cfg.tasks_dir)?;
        choo_types::Graph::build(&units).map_err(|e| ManagerError::InvalidArgument(e.to_string()))?;
        if let Some(filter_id) = &cfg.unit_filter {
            units.retain(|u| &u.id == filter_id);
            if units.is_empty() {
                return Err(ManagerError::InvalidArgument(format!("unit filter references unknown unit: {filter_id}")));
            }
            units[0].depends_on.clear();
        }

        self.store
            .create_run(RunRecord {
                id: job_id.clone(),
                repo_path: repo_path.clone(),
                tasks_dir: cfg.tasks_dir.clone(),
                target_branch: cfg.target_branch.clone(),
                feature_branch: feature_branch.clone(),
                parallelism: cfg.parallelism,
                status: JobStatus::Running,
                created_at: chrono::Utc::now(),
                started_at: Some(chrono::Utc::now()),
                completed_at: None,
                error: None,
            })
            .await?;

        let (owner, repo) = github_owner_repo(&repo_path).await.unwrap_or_else(|| ("unknown".to_string(), "unknown".to_string()));

        let bus = EventBus::with_capacity(job_id.clone(), self.event_buffer_capacity);
        // `bus.subscribe`'s handler already runs sequentially on one
        // per-subscriber task, in publish order. Persisting must stay
        // sequential too: a detached `tokio::spawn` per event would race
        // `append_event` calls against each other and could persist them
        // (and assign their sequences) out of the order the bus assigned
        // and broadcast them in. A single consumer task draining an
        // unbounded channel keeps every write ordered. The returned
        // `Subscription` is kept alive in `ActiveJob` — dropping it
        // unsubscribes immediately.
        let (persist_tx, mut persist_rx) = tokio::sync::mpsc::unbounded_channel::<choo_types::Event>();
        let persist_sub = bus.subscribe(move |event| {
            let _ = persist_tx.send(event);
        });
        {
            let store = self.store.clone();
            let run_id = job_id.clone();
            tokio::spawn(async move {
                while let Some(event) = persist_rx.recv().await {
                    if let Err(e) = store.append_event(&run_id, event).await {
                        tracing::warn!(run_id = %run_id, error = %e, "failed to persist event");
                    }
                }
            });
        }

        let git = Arc::new(GitRepo::new(
            repo_path.clone(),
            SafetyConfig::default().with_branch_guard(BranchGuard::with_protected_defaults()),
        ));

        let worker_config = WorkerConfig::new(owner, repo, cfg.target_branch.clone(), job_id.clone(), repo_path.clone())
            .with_review_poll_interval(self.review_poll_interval)
            .with_review_deadline(self.review_deadline);

        let pool = Arc::new(WorkerPool::new(
            cfg.parallelism,
            git,
            self.github.clone(),
            self.provider_factory.clone(),
            self.escalator.clone(),
            bus.clone(),
            worker_config,
        ));

        let scheduler = Arc::new(Scheduler::new(cfg.parallelism, bus.clone()));
        let orchestrator = Orchestrator::new(job_id.clone(), scheduler, pool, self.store.clone(), bus.clone());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let store = self.store.clone();
        let run_id = job_id.clone();
        let handle_bus = bus.clone();
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = orchestrator.run(units, cancel_rx).await;
            let (status, error) = match outcome {
                Ok(OrchestratorOutcome::AllComplete) => (JobStatus::Completed, None),
                Ok(OrchestratorOutcome::SomeBlocked) => (JobStatus::Failed, Some("one or more units failed or were blocked".to_string())),
                Err(e) => (JobStatus::Failed, Some(e.to_string())),
            };
            if let Err(e) = store.update_run_status(&run_id, status, error).await {
                tracing::error!(run_id = %run_id, error = %e, "failed to persist final run status");
            }
            // Closing the bus drops every subscriber, which unblocks any
            // `subscribe()` caller still waiting on live events.
            handle_bus.close();
            manager.active.lock().unwrap().remove(&run_id);
        });

        self.active.lock().unwrap().insert(
            job_id.clone(),
            ActiveJob { bus, cancel_tx, handle, repo_path, _persist_sub: persist_sub },
        );

        Ok(job_id)
    }

    /// Cancels a job's orchestrator. `force` doesn't distinguish a hard
    /// kill from a soft stop at this layer — cancellation always proceeds
    /// at the next suspension point each worker observes; immediate
    /// subprocess termination on `force=true` is a worker-local concern.
    pub async fn stop(&self, job_id: &str, _force: bool) -> Result<(), ManagerError> {
        let run = self.store.get_run(job_id).await.map_err(|_| ManagerError::NotFound(job_id.to_string()))?;
        if run.status.is_terminal() {
            return Err(ManagerError::Terminal(job_id.to_string()));
        }

        let active = self.active.lock().unwrap();
        match active.get(job_id) {
            Some(job) => {
                let _ = job.cancel_tx.send(true);
                Ok(())
            }
            None => Err(ManagerError::NotFound(job_id.to_string())),
        }
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, ManagerError> {
        let run = self.store.get_run(job_id).await.map_err(|_| ManagerError::NotFound(job_id.to_string()))?;
        let unit_records = self.store.list_units_by_run(job_id).await?;

        let mut job = Job::new(
            run.id.clone(),
            JobConfig {
                repo_path: run.repo_path,
                tasks_dir: run.tasks_dir,
                target_branch: run.target_branch,
                parallelism: run.parallelism,
                unit_filter: None,
                feature_branch: Some(run.feature_branch),
            },
        );
        job.status = run.status;
        job.created_at = run.created_at;
        job.started_at = run.started_at;
        job.completed_at = run.completed_at;
        job.error = run.error;
        job.units = unit_records
            .into_iter()
            .map(|u| {
                let mut unit = Unit::new(u.unit_id, Vec::new(), Vec::new());
                unit.status = u.status;
                unit.branch = u.branch;
                unit.worktree = u.worktree;
                unit.pr_number = u.pr_number;
                unit.started_at = u.started_at;
                unit.completed_at = u.completed_at;
                unit.error = u.error;
                unit
            })
            .collect();

        Ok(job)
    }

    pub async fn list_jobs(&self, status_filter: Option<JobStatus>) -> Result<Vec<Job>, ManagerError> {
        let runs = match status_filter {
            Some(status) => self.store.list_runs_by_status(status).await?,
            None => self.store.list_incomplete_runs().await?,
        };
        let mut jobs = Vec::with_capacity(runs.len());
        for run in runs {
            jobs.push(self.get_job(&run.id).await?);
        }
        Ok(jobs)
    }

    /// Opens a streaming subscription. If `from_sequence > 0`, historical
    /// events are replayed from the Persistence Interface strictly before
    /// any live event; for a job no longer active, this list is everything
    /// there is (the stream then closes immediately).
    pub async fn subscribe(&self, job_id: &str, from_sequence: i64) -> Result<tokio::sync::mpsc::Receiver<choo_types::Event>, ManagerError> {
        self.store.get_run(job_id).await.map_err(|_| ManagerError::NotFound(job_id.to_string()))?;

        let (tx, rx) = tokio::sync::mpsc::channel(256);

        let active = self.active.lock().unwrap();
        match active.get(job_id) {
            Some(job) => {
                let bus = job.bus.clone();
                let sub = bus.subscribe_from(from_sequence.max(0), move |event| {
                    let _ = tx.try_send(event);
                });
                // Subscription is intentionally leaked to the bus; it is
                // torn down when the bus closes at orchestrator exit.
                std::mem::forget(sub);
            }
            None => {
                let store = self.store.clone();
                let job_id = job_id.to_string();
                tokio::spawn(async move {
                    if let Ok(events) = store.list_events(&job_id, from_sequence.max(0), None).await {
                        for event in events {
                            let _ = tx.send(event).await;
                        }
                    }
                });
            }
        }

        Ok(rx)
    }

    pub fn active_job_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Invoked at daemon start: validates and relaunches every persisted
    /// run still marked `running`. Per-run resume failures are logged and
    /// do not abort startup.
    pub async fn resume(&self) -> Result<(), ManagerError> {
        let incomplete = self.store.list_incomplete_runs().await?;
        for run in incomplete {
            if run.status != JobStatus::Running {
                continue;
            }
            if !run.repo_path.exists() {
                let _ = self
                    .store
                    .update_run_status(&run.id, JobStatus::Failed, Some(format!("repo path no longer exists: {}", run.repo_path.display())))
                    .await;
                continue;
            }

            let units = self.store.list_units_by_run(&run.id).await.unwrap_or_default();
            for unit in units {
                if unit.status == UnitStatus::InProgress {
                    let still_there = unit.worktree.as_ref().map(|w| w.exists()).unwrap_or(false);
                    if !still_there {
                        let _ = self
                            .store
                            .update_unit_status(&run.id, &unit.unit_id, UnitStatus::Failed, Some("worktree no longer exists".to_string()))
                            .await;
                    }
                }
            }

            tracing::warn!(run_id = %run.id, "run left incomplete across a restart; resume requires re-running StartJob with the same feature branch to pick up remaining units");
        }
        Ok(())
    }

    /// Sets the manager to a shutting-down state, optionally waits for
    /// active jobs to terminate up to `timeout`, then force-stops
    /// survivors.
    pub async fn shutdown(&self, wait_for_jobs: bool, timeout: Duration) -> Result<usize, ManagerError> {
        {
            let mut shutting_down = self.shutting_down.lock().unwrap();
            if *shutting_down {
                return Err(ManagerError::AlreadyShuttingDown);
            }
            *shutting_down = true;
        }

        let job_ids: Vec<String> = self.active.lock().unwrap().keys().cloned().collect();
        for id in &job_ids {
            let active = self.active.lock().unwrap();
            if let Some(job) = active.get(id) {
                let _ = job.cancel_tx.send(true);
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        if wait_for_jobs {
            while tokio::time::Instant::now() < deadline {
                if self.active.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        let mut stopped = 0;
        let remaining: Vec<(String, JoinHandle<()>)> = {
            let mut active = self.active.lock().unwrap();
            active.drain().map(|(id, job)| (id, job.handle)).collect()
        };
        for (_, handle) in remaining {
            handle.abort();
            stopped += 1;
        }

        Ok(stopped)
    }
}

/// Parses `owner/repo` from the `origin` remote's URL, supporting both
/// `git@github.com:owner/repo.git` and `https://github.com/owner/repo.git`
/// forms. A one-shot startup lookup, not a guarded git façade operation.
async fn github_owner_repo(repo_path: &Path) -> Option<(String, String)> {
    let output = tokio::process::Command::new("git")
        .args(["remote", "get-url", "origin"])
        .current_dir(repo_path)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    parse_owner_repo(&url)
}

fn parse_owner_repo(url: &str) -> Option<(String, String)> {
    let trimmed = url.trim_end_matches(".git");
    let path = trimmed.rsplit_once("github.com").map(|(_, rest)| rest.trim_start_matches([':', '/']))?;
    let (owner, repo) = path.split_once('/')?;
    Some((owner.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ssh_remote() {
        assert_eq!(parse_owner_repo("git@github.com:acme/widgets.git"), Some(("acme".to_string(), "widgets".to_string())));
    }

    #[test]
    fn parses_https_remote() {
        assert_eq!(parse_owner_repo("https://github.com/acme/widgets.git"), Some(("acme".to_string(), "widgets".to_string())));
    }

    #[test]
    fn rejects_non_github_remote() {
        assert_eq!(parse_owner_repo("https://gitlab.com/acme/widgets.git"), None);
    }
}

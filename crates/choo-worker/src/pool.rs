//! WorkerPool: fixed-size bounded concurrency over worker lifecycles
//! (spec.md §4.4). Grounded on `durable/src/worker/pool.rs`'s semaphore +
//! watch-channel shutdown shape, adapted from a poll-driven activity queue
//! to directly-submitted units.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use choo_eventbus::EventBus;
use choo_github::GithubClient;
use choo_gitops::GitOperations;
use choo_types::Unit;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::error::WorkerError;
use crate::escalation::Escalator;
use crate::provider::ProviderFactory;
use crate::worker::{Worker, WorkerConfig};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("unit {0} was already submitted to this pool")]
    AlreadySubmitted(String),

    #[error("graceful shutdown timed out with workers still in flight")]
    ShutdownTimeout,
}

pub struct WorkerPool {
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
    git: Arc<dyn GitOperations>,
    github: Arc<dyn GithubClient>,
    provider_factory: ProviderFactory,
    escalator: Arc<dyn Escalator>,
    bus: EventBus,
    config_base: WorkerConfig,
    submitted: Mutex<HashSet<String>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        max_concurrency: usize,
        git: Arc<dyn GitOperations>,
        github: Arc<dyn GithubClient>,
        provider_factory: ProviderFactory,
        escalator: Arc<dyn Escalator>,
        bus: EventBus,
        config_base: WorkerConfig,
    ) -> Self {
        let max_concurrency = max_concurrency.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            git,
            github,
            provider_factory,
            escalator,
            bus,
            config_base,
            submitted: Mutex::new(HashSet::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Assigns `unit` to a free worker slot, blocking on the pool's
    /// semaphore if `max_concurrency` workers are already active. The
    /// returned handle yields the unit (with its worker-owned fields
    /// mutated in place) and the lifecycle's outcome once it finishes.
    pub async fn submit(&self, unit: Unit) -> Result<JoinHandle<(Unit, Result<(), WorkerError>)>, PoolError> {
        {
            let mut submitted = self.submitted.lock().unwrap();
            if !submitted.insert(unit.id.clone()) {
                return Err(PoolError::AlreadySubmitted(unit.id));
            }
        }

        let permit = self.semaphore.clone().acquire_owned().await.expect("pool semaphore is never closed");
        let git = self.git.clone();
        let github = self.github.clone();
        let provider = (self.provider_factory)(&unit.id);
        let escalator = self.escalator.clone();
        let bus = self.bus.clone();
        let config = self.config_base.clone();
        let cancel_rx = self.shutdown_rx.clone();
        let mut unit = unit;

        Ok(tokio::spawn(async move {
            let _permit = permit;
            let worker = Worker::new(config, git, github, provider, escalator, bus);
            let result = worker.run_unit(&mut unit, cancel_rx).await;
            (unit, result)
        }))
    }

    /// Signals cancellation to every in-flight worker and waits for all
    /// semaphore permits to return, i.e. every worker to exit, up to
    /// `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), PoolError> {
        let _ = self.shutdown_tx.send(true);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.semaphore.available_permits() == self.max_concurrency {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PoolError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.max_concurrency - self.semaphore.available_permits()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::TracingEscalator;
    use crate::provider::{Provider, ProviderInvocation, ProviderOutcome};
    use async_trait::async_trait;
    use choo_github::FakeGithubClient;
    use choo_gitops::InMemoryGitOps;
    use choo_types::Task;
    use std::path::PathBuf;

    struct NoopProvider;

    #[async_trait]
    impl Provider for NoopProvider {
        async fn run(&self, _invocation: ProviderInvocation<'_>) -> Result<ProviderOutcome, crate::provider::ProviderError> {
            Ok(ProviderOutcome { exit_success: true, stdout_tail: String::new(), stderr_tail: String::new() })
        }
    }

    fn unit(id: &str) -> Unit {
        Unit::new(id, vec![Task::new(0, "do it", "body", "true", vec![])], vec![])
    }

    fn pool(max_concurrency: usize, github: Arc<FakeGithubClient>) -> WorkerPool {
        let git = Arc::new(InMemoryGitOps::new(PathBuf::from("/repo"), choo_gitops::SafetyConfig::default().allow_destructive(true), "main"));
        let factory: ProviderFactory = Arc::new(|_unit_id| Arc::new(NoopProvider) as Arc<dyn Provider>);
        let escalator = Arc::new(TracingEscalator);
        let bus = EventBus::new("job-1");
        let config = WorkerConfig::new("acme", "widgets", "main", "job-1", PathBuf::from("/repo"))
            .with_review_poll_interval(Duration::from_millis(5))
            .with_review_deadline(Duration::from_millis(200));
        WorkerPool::new(max_concurrency, git, github, factory, escalator, bus, config)
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let pool = pool(2, Arc::new(FakeGithubClient::new()));
        let handle = pool.submit(unit("a")).await.unwrap();
        let err = pool.submit(unit("a")).await.unwrap_err();
        assert!(matches!(err, PoolError::AlreadySubmitted(_)));
        let _ = handle.await;
    }

    #[tokio::test]
    async fn unit_runs_to_completion_through_review_and_merge() {
        let github = Arc::new(FakeGithubClient::new());
        // The pool hands out PR numbers sequentially starting at 1; pre-seed
        // the approval reaction for the PR this unit will open.
        github.add_reaction(1, choo_github::Reaction { kind: "+1".into(), created_at: chrono::Utc::now() });
        let p = pool(1, github);

        let handle = p.submit(unit("a")).await.unwrap();
        let (unit, result) = handle.await.unwrap();
        assert!(result.is_ok(), "{result:?}");
        assert_eq!(unit.pr_number, Some(1));
    }

    #[tokio::test]
    async fn unreviewed_pr_fails_once_deadline_elapses() {
        let p = pool(1, Arc::new(FakeGithubClient::new()));
        let handle = p.submit(unit("a")).await.unwrap();
        let (unit, result) = handle.await.unwrap();
        assert!(matches!(result, Err(WorkerError::ReviewDeadlineExceeded { .. })));
        assert!(unit.error.is_some());
    }

    #[tokio::test]
    async fn shutdown_waits_for_active_workers_to_drain() {
        let p = pool(1, Arc::new(FakeGithubClient::new()));
        let handle = p.submit(unit("a")).await.unwrap();
        p.shutdown(Duration::from_secs(2)).await.unwrap();
        let _ = handle.await;
        assert_eq!(p.active_count(), 0);
    }
}

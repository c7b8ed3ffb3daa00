//! A single unit's lifecycle (spec.md §4.4): worktree materialize, task
//! loop, PR open, review cycle, merge. The worker owns `Unit::branch`,
//! `Unit::worktree`, `Unit::pr_number`, and its timestamps/error — lifecycle
//! `status` itself is the scheduler's alone, driven by whatever calls
//! `run_unit` and interprets its `Result`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use choo_eventbus::EventBus;
use choo_github::{GithubClient, PrInfo, ReviewState};
use choo_gitops::{GitOperations, PushForce};
use choo_types::{Event, EventKind, Task, TaskStatus, Unit};
use tokio::sync::watch;

use crate::error::WorkerError;
use crate::escalation::{Escalation, Escalator, Severity};
use crate::provider::{tail, Provider, ProviderInvocation};
use crate::retry::RetryPolicy;

/// Static configuration for one worker. Shared (read-only) across every
/// unit a pool hands to the same worker.
#[derive(Clone)]
pub struct WorkerConfig {
    pub owner: String,
    pub repo: String,
    pub target_branch: String,
    pub job_id: String,
    /// The git façade's bound path doubles as the worktree: this crate's
    /// `GitOperations` is path-scoped (spec.md §4.5) rather than exposing a
    /// separate `git worktree add` primitive, so branch isolation is via
    /// checkout within this one path.
    pub worktree_path: PathBuf,
    pub task_retry: RetryPolicy,
    pub feedback_retry: RetryPolicy,
    pub review_poll_interval: Duration,
    pub review_deadline: Duration,
}

impl WorkerConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, target_branch: impl Into<String>, job_id: impl Into<String>, worktree_path: PathBuf) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            target_branch: target_branch.into(),
            job_id: job_id.into(),
            worktree_path,
            task_retry: RetryPolicy::exponential(),
            feedback_retry: RetryPolicy::exponential(),
            review_poll_interval: Duration::from_secs(30),
            review_deadline: Duration::from_secs(6 * 3600),
        }
    }

    pub fn with_task_retry(mut self, policy: RetryPolicy) -> Self {
        self.task_retry = policy;
        self
    }

    pub fn with_feedback_retry(mut self, policy: RetryPolicy) -> Self {
        self.feedback_retry = policy;
        self
    }

    pub fn with_review_poll_interval(mut self, interval: Duration) -> Self {
        self.review_poll_interval = interval;
        self
    }

    pub fn with_review_deadline(mut self, deadline: Duration) -> Self {
        self.review_deadline = deadline;
        self
    }
}

pub struct Worker {
    config: WorkerConfig,
    git: Arc<dyn GitOperations>,
    github: Arc<dyn GithubClient>,
    provider: Arc<dyn Provider>,
    escalator: Arc<dyn Escalator>,
    bus: EventBus,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        git: Arc<dyn GitOperations>,
        github: Arc<dyn GithubClient>,
        provider: Arc<dyn Provider>,
        escalator: Arc<dyn Escalator>,
        bus: EventBus,
    ) -> Self {
        Self { config, git, github, provider, escalator, bus }
    }

    /// Drives `unit` from `pending` through to `complete`/`failed`,
    /// returning once the unit reaches a terminal outcome or `cancel`
    /// observes a shutdown signal.
    pub async fn run_unit(&self, unit: &mut Unit, mut cancel: watch::Receiver<bool>) -> Result<(), WorkerError> {
        unit.started_at = Some(Utc::now());
        let branch = unit.feature_branch_name(&self.config.job_id);

        if let Err(e) = self.git.checkout_branch(&branch, true, Some(&self.config.target_branch)).await {
            self.fail_unit(unit, e.to_string());
            return Err(e.into());
        }
        unit.branch = Some(branch.clone());
        unit.worktree = Some(self.config.worktree_path.clone());

        if let Err(err) = self.run_tasks(unit, &mut cancel).await {
            return Err(err);
        }

        let pr = match self.open_pr(unit, &branch).await {
            Ok(pr) => pr,
            Err(e) => {
                self.fail_unit(unit, e.to_string());
                return Err(e);
            }
        };
        unit.pr_number = Some(pr.number);
        self.publish(EventKind::UnitPrOpen, unit, None);

        self.review_cycle(unit, &branch, pr.number, &mut cancel).await
    }

    async fn run_tasks(&self, unit: &mut Unit, cancel: &mut watch::Receiver<bool>) -> Result<(), WorkerError> {
        let unit_id = unit.id.clone();
        for task in unit.tasks.iter_mut() {
            Self::publish_task(&self.bus, EventKind::TaskStarted, &unit_id, task.index, None);

            let mut feedback = String::new();
            let mut succeeded = false;

            for attempt in 1..=self.config.task_retry.max_attempts {
                if *cancel.borrow() {
                    return Err(WorkerError::Cancelled { unit: unit_id.clone() });
                }
                if attempt > 1 {
                    tokio::time::sleep(self.config.task_retry.delay_for_attempt(attempt)).await;
                }

                Self::publish_task(&self.bus, EventKind::TaskProviderInvoke, &unit_id, task.index, None);
                let prompt = build_task_prompt(task, &feedback);
                let log_path = self
                    .config
                    .worktree_path
                    .join(".choo")
                    .join("logs")
                    .join(format!("unit-{unit_id}-task-{}-attempt-{attempt}.log", task.index));

                let provider_result = self
                    .provider
                    .run(ProviderInvocation {
                        unit_id: &unit_id,
                        task_index: task.index,
                        prompt,
                        worktree: &self.config.worktree_path,
                        log_path,
                    })
                    .await;
                Self::publish_task(&self.bus, EventKind::TaskProviderDone, &unit_id, task.index, None);

                if let Err(e) = provider_result {
                    feedback = e.to_string();
                    continue;
                }

                match run_backpressure(&task.backpressure, &self.config.worktree_path).await {
                    Ok(()) => {
                        if let Err(e) = self.commit_task(task).await {
                            feedback = e.to_string();
                            continue;
                        }
                        task.status = TaskStatus::Completed;
                        Self::publish_task(&self.bus, EventKind::TaskCompleted, &unit_id, task.index, None);
                        succeeded = true;
                        break;
                    }
                    Err(stderr_snippet) => feedback = stderr_snippet,
                }
            }

            if !succeeded {
                task.status = TaskStatus::Failed;
                let task_index = task.index;
                Self::publish_task(&self.bus, EventKind::TaskFailed, &unit_id, task_index, Some(feedback.clone()));
                let reason = format!("task {} exhausted retry budget: {feedback}", task_index);
                self.fail_unit(unit, reason);
                return Err(WorkerError::TaskExhausted { unit: unit_id, task: task_index });
            }
        }
        Ok(())
    }

    async fn commit_task(&self, task: &Task) -> Result<(), choo_gitops::GitOpsError> {
        self.git.add_all().await?;
        self.git.commit(&task.commit_message()).await?;
        Ok(())
    }

    async fn open_pr(&self, unit: &Unit, branch: &str) -> Result<PrInfo, WorkerError> {
        self.git.push("origin", branch, PushForce::None).await?;
        let pr = self
            .github
            .open_pr(&self.config.owner, &self.config.repo, branch, &self.config.target_branch, &pr_title(unit), &pr_body(unit))
            .await?;
        Ok(pr)
    }

    async fn review_cycle(&self, unit: &mut Unit, branch: &str, pr_number: u64, cancel: &mut watch::Receiver<bool>) -> Result<(), WorkerError> {
        let deadline = tokio::time::Instant::now() + self.config.review_deadline;
        let mut in_review_emitted = false;
        let mut last_seen_comments = 0usize;

        loop {
            if *cancel.borrow() {
                return Err(WorkerError::Cancelled { unit: unit.id.clone() });
            }
            if tokio::time::Instant::now() >= deadline {
                self.fail_unit(unit, "review cycle exceeded its deadline".to_string());
                self.escalator
                    .escalate(&Escalation::new(
                        Severity::Warning,
                        &unit.id,
                        "review deadline exceeded",
                        "PR review did not resolve before the configured deadline",
                    ))
                    .await
                    .ok();
                return Err(WorkerError::ReviewDeadlineExceeded { unit: unit.id.clone() });
            }

            let status = match self.github.get_review_status(&self.config.owner, &self.config.repo, pr_number).await {
                Ok(status) => status,
                Err(e) => {
                    self.fail_unit(unit, e.to_string());
                    return Err(e.into());
                }
            };

            match status.state {
                ReviewState::Approved => {
                    self.publish(EventKind::UnitMerging, unit, None);
                    let merge = match self.github.merge(&self.config.owner, &self.config.repo, pr_number).await {
                        Ok(m) => m,
                        Err(e) => {
                            self.fail_unit(unit, e.to_string());
                            return Err(e.into());
                        }
                    };
                    return if merge.merged {
                        unit.completed_at = Some(Utc::now());
                        Ok(())
                    } else {
                        let reason = merge.message.clone();
                        self.fail_unit(unit, reason.clone());
                        Err(WorkerError::MergeFailed { unit: unit.id.clone(), reason })
                    };
                }
                ReviewState::InProgress => {
                    if !in_review_emitted {
                        self.publish(EventKind::UnitInReview, unit, None);
                        in_review_emitted = true;
                    }
                }
                ReviewState::ChangesRequested => {
                    if status.comments.len() > last_seen_comments {
                        last_seen_comments = status.comments.len();
                        if !self.handle_feedback(unit, branch, &status.comments).await {
                            self.fail_unit(unit, "could not address review feedback within retry budget".to_string());
                            self.escalator
                                .escalate(&Escalation::new(
                                    Severity::Blocking,
                                    &unit.id,
                                    "feedback handler failed",
                                    "provider could not produce a pushable fix within the retry budget",
                                ))
                                .await
                                .ok();
                            return Err(WorkerError::FeedbackExhausted { unit: unit.id.clone() });
                        }
                    }
                }
                ReviewState::Pending => {}
            }

            tokio::time::sleep(self.config.review_poll_interval).await;
        }
    }

    /// Returns whether the branch was advanced and pushed within the
    /// feedback retry budget.
    async fn handle_feedback(&self, unit: &Unit, branch: &str, comments: &[choo_github::Comment]) -> bool {
        let prompt = build_feedback_prompt(&unit.id, comments);

        for attempt in 1..=self.config.feedback_retry.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.feedback_retry.delay_for_attempt(attempt)).await;
            }

            let before = match self.git.rev_parse("HEAD").await {
                Ok(sha) => sha,
                Err(_) => continue,
            };

            let log_path = self.config.worktree_path.join(".choo").join("logs").join(format!("unit-{}-feedback-attempt-{attempt}.log", unit.id));
            let invoked = self
                .provider
                .run(ProviderInvocation {
                    unit_id: &unit.id,
                    task_index: u32::MAX,
                    prompt: prompt.clone(),
                    worktree: &self.config.worktree_path,
                    log_path,
                })
                .await;
            if invoked.is_err() {
                continue;
            }
            if self.git.add_all().await.is_err() {
                continue;
            }
            if self.git.commit("fix: address code review feedback").await.is_err() {
                continue;
            }
            if self.git.push("origin", branch, PushForce::None).await.is_err() {
                continue;
            }

            let after = match self.git.rev_parse("HEAD").await {
                Ok(sha) => sha,
                Err(_) => continue,
            };
            if after != before {
                self.publish(EventKind::PrFeedbackAddressed, unit, None);
                return true;
            }
        }
        false
    }

    /// Records the failure on the worker's local `Unit` so the caller can
    /// read `error`/`completed_at` back out; the `unit.failed` event itself
    /// is the scheduler's to emit once it transitions the unit to `failed`
    /// (`Scheduler::fail` publishes it with this same reason).
    fn fail_unit(&self, unit: &mut Unit, reason: String) {
        unit.error = Some(reason);
        unit.completed_at = Some(Utc::now());
    }

    fn publish(&self, kind: EventKind, unit: &Unit, error: Option<String>) {
        let mut event = Event::new(kind, serde_json::json!({})).with_unit(unit.id.clone());
        if let Some(pr) = unit.pr_number {
            event = event.with_pr(pr);
        }
        if let Some(err) = error {
            event = event.with_error(err);
        }
        self.bus.publish(event);
    }

    fn publish_task(bus: &EventBus, kind: EventKind, unit_id: &str, task_index: u32, error: Option<String>) {
        let mut event = Event::new(kind, serde_json::json!({})).with_unit(unit_id).with_task(task_index);
        if let Some(err) = error {
            event = event.with_error(tail(&err, 500));
        }
        bus.publish(event);
    }
}

fn pr_title(unit: &Unit) -> String {
    format!("choo: {}", unit.id)
}

fn pr_body(unit: &Unit) -> String {
    let mut body = String::from("Automated unit completed by choo.\n\nTasks:\n");
    for task in &unit.tasks {
        body.push_str(&format!("- {}\n", task.title));
    }
    body
}

fn build_task_prompt(task: &Task, feedback: &str) -> String {
    let mut prompt = format!("# Task: {}\n\n{}\n\nBackpressure check: `{}`\n", task.title, task.body, task.backpressure);
    if !feedback.is_empty() {
        prompt.push_str(&format!("\nThe previous attempt failed with:\n{feedback}\n"));
    }
    prompt
}

fn build_feedback_prompt(unit_id: &str, comments: &[choo_github::Comment]) -> String {
    let mut prompt = format!("# Address code review feedback for unit {unit_id}\n\n");
    for comment in comments {
        prompt.push_str(&format!("- {} ({}): {}\n", comment.author, comment.created_at, comment.body));
    }
    prompt
}

async fn run_backpressure(command: &str, worktree: &std::path::Path) -> Result<(), String> {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(worktree)
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(())
    } else {
        Err(tail(&String::from_utf8_lossy(&output.stderr), 500))
    }
}

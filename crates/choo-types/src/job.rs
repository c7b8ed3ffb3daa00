//! Job (run): the top-level execution of a scheduler over a unit DAG.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::unit::Unit;

/// Immutable configuration for a single job, supplied by the client that
/// calls `StartJob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub repo_path: PathBuf,
    pub tasks_dir: PathBuf,
    pub target_branch: String,

    /// Concurrency cap `N` passed to the scheduler and worker pool.
    pub parallelism: usize,

    /// Restrict the run to a single unit (and, transitively, nothing else —
    /// the rest of the DAG is still parsed so dependency validation still
    /// runs, but only this unit is scheduled).
    pub unit_filter: Option<String>,

    /// Overrides the per-unit feature branch prefix; defaults to a name
    /// derived from the job id.
    pub feature_branch: Option<String>,
}

impl JobConfig {
    /// Validation performed by the Job Manager before a run is persisted.
    pub fn validate(&self) -> Result<(), String> {
        if !self.repo_path.is_absolute() {
            return Err("repo_path must be absolute".into());
        }
        if !self.repo_path.exists() {
            return Err(format!("repo_path does not exist: {}", self.repo_path.display()));
        }
        if self.tasks_dir.as_os_str().is_empty() {
            return Err("tasks_dir must not be empty".into());
        }
        if self.target_branch.trim().is_empty() {
            return Err("target_branch must not be empty".into());
        }
        if self.parallelism == 0 {
            return Err("parallelism must be >= 1".into());
        }
        Ok(())
    }

    /// Identity used to reject duplicate concurrent runs: (feature branch,
    /// repo path).
    pub fn identity_key(&self, job_id: &str) -> (String, PathBuf) {
        let branch = self
            .feature_branch
            .clone()
            .unwrap_or_else(|| format!("choo/{job_id}"));
        (branch, self.repo_path.clone())
    }
}

/// Status of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A job: configuration plus the units it owns and its own status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub config: JobConfig,
    pub status: JobStatus,
    pub units: Vec<Unit>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>, config: JobConfig) -> Self {
        Self {
            id: id.into(),
            config,
            status: JobStatus::Pending,
            units: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn unit_mut(&mut self, id: &str) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| u.id == id)
    }

    pub fn summary(&self) -> JobSummary {
        let mut completed = 0;
        let mut failed = 0;
        let mut blocked = 0;
        for u in &self.units {
            match u.status {
                crate::UnitStatus::Complete => completed += 1,
                crate::UnitStatus::Failed => failed += 1,
                crate::UnitStatus::Blocked => blocked += 1,
                _ => {}
            }
        }
        JobSummary {
            total: self.units.len(),
            completed,
            failed,
            blocked,
        }
    }
}

/// Aggregate counts used by end-to-end assertions and status snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

//! The Persistence Interface contract (spec.md §4.8): Run CRUD, Unit CRUD,
//! and a per-run event log. Implementation is pluggable; [`crate::InMemoryStore`]
//! is the only concrete implementation this workspace ships.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use choo_types::{Event, JobStatus, UnitStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("unit not found: {run_id}/{unit_id}")]
    UnitNotFound { run_id: String, unit_id: String },

    #[error("a non-terminal run already exists for branch {branch} in {repo_path}")]
    DuplicateRun { branch: String, repo_path: PathBuf },
}

/// A persisted run (one [`choo_types::Job`] minus its live unit list, which
/// is persisted separately via the Unit CRUD methods).
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub repo_path: PathBuf,
    pub tasks_dir: PathBuf,
    pub target_branch: String,
    pub feature_branch: String,
    pub parallelism: usize,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A persisted unit. Composite key is `(run_id, unit_id)`.
#[derive(Debug, Clone)]
pub struct UnitRecord {
    pub run_id: String,
    pub unit_id: String,
    pub status: UnitStatus,
    pub branch: Option<String>,
    pub worktree: Option<PathBuf>,
    pub pr_number: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[async_trait]
pub trait PersistenceStore: Send + Sync + 'static {
    /// Fails with `DuplicateRun` if a non-terminal run already exists for
    /// `(feature_branch, repo_path)`.
    async fn create_run(&self, run: RunRecord) -> Result<(), StoreError>;
    async fn get_run(&self, id: &str) -> Result<RunRecord, StoreError>;
    async fn get_run_by_branch(&self, branch: &str, repo_path: &Path) -> Result<Option<RunRecord>, StoreError>;
    /// Updates `started_at` on the first transition to `running` and
    /// `completed_at` on the first transition to any terminal status.
    async fn update_run_status(&self, id: &str, status: JobStatus, error: Option<String>) -> Result<(), StoreError>;
    async fn list_runs_by_status(&self, status: JobStatus) -> Result<Vec<RunRecord>, StoreError>;
    async fn list_incomplete_runs(&self) -> Result<Vec<RunRecord>, StoreError>;
    /// Cascades to the run's units and event log.
    async fn delete_run(&self, id: &str) -> Result<(), StoreError>;

    async fn create_unit(&self, unit: UnitRecord) -> Result<(), StoreError>;
    async fn get_unit(&self, run_id: &str, unit_id: &str) -> Result<UnitRecord, StoreError>;
    async fn update_unit_status(
        &self,
        run_id: &str,
        unit_id: &str,
        status: UnitStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;
    async fn update_unit_branch(
        &self,
        run_id: &str,
        unit_id: &str,
        branch: String,
        worktree: PathBuf,
    ) -> Result<(), StoreError>;
    async fn list_units_by_run(&self, run_id: &str) -> Result<Vec<UnitRecord>, StoreError>;
    async fn list_units_by_status(&self, run_id: &str, status: UnitStatus) -> Result<Vec<UnitRecord>, StoreError>;

    /// Appends `event` to `run_id`'s log in the order received, preserving
    /// its bus-assigned `sequence` (the event bus, not the store, is the
    /// source of truth for ordering); events with no sequence of their own
    /// are assigned the next one. Returns the sequence stored.
    async fn append_event(&self, run_id: &str, event: Event) -> Result<i64, StoreError>;
    /// Events with `sequence >= from_sequence`, oldest first, capped at
    /// `limit` if given.
    async fn list_events(&self, run_id: &str, from_sequence: i64, limit: Option<usize>) -> Result<Vec<Event>, StoreError>;
}

//! Unit: a coherent work item with an ordered task list that becomes one PR.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Lifecycle state of a [`Unit`], owned exclusively by the scheduler.
///
/// See the allowed-transitions table in the scheduler crate for which
/// moves are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Ready,
    InProgress,
    PrOpen,
    InReview,
    Merging,
    Complete,
    Failed,
    Blocked,
}

impl UnitStatus {
    /// Active states consume a parallelism slot.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            UnitStatus::InProgress
                | UnitStatus::PrOpen
                | UnitStatus::InReview
                | UnitStatus::Merging
        )
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitStatus::Complete | UnitStatus::Failed | UnitStatus::Blocked
        )
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Ready => "ready",
            UnitStatus::InProgress => "in_progress",
            UnitStatus::PrOpen => "pr_open",
            UnitStatus::InReview => "in_review",
            UnitStatus::Merging => "merging",
            UnitStatus::Complete => "complete",
            UnitStatus::Failed => "failed",
            UnitStatus::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

/// A single work item: an ordered list of tasks, a set of dependency unit
/// IDs, and the lifecycle/branch/PR bookkeeping the scheduler and worker
/// attach as execution proceeds.
///
/// Ownership: created by Discovery; `status` and dependency-derived fields
/// are mutated only by the Scheduler, `branch`/`worktree`/`pr_number`/the
/// timestamps only by the owning Worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub tasks: Vec<Task>,
    pub depends_on: Vec<String>,

    pub status: UnitStatus,
    pub branch: Option<String>,
    pub worktree: Option<std::path::PathBuf>,
    pub pr_number: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Unit {
    pub fn new(id: impl Into<String>, tasks: Vec<Task>, depends_on: Vec<String>) -> Self {
        let mut tasks = tasks;
        tasks.sort_by_key(|t| t.index);
        Self {
            id: id.into(),
            tasks,
            depends_on,
            status: UnitStatus::Pending,
            branch: None,
            worktree: None,
            pr_number: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn feature_branch_name(&self, job_id: &str) -> String {
        format!("choo/{job_id}/{}", self.id)
    }
}

//! Task: the atomic, ordered step inside a unit.

use serde::{Deserialize, Serialize};

/// Status of a single task within a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Declared but not yet started.
    Pending,
    /// Provider has been invoked at least once for this task.
    Running,
    /// Backpressure command exited 0 and the task's commit was made.
    Completed,
    /// Retry budget exhausted without a passing backpressure command.
    Failed,
}

/// A single ordered step inside a [`crate::Unit`].
///
/// A task is declared complete when its `backpressure` command exits 0 with
/// the working directory set to the owning unit's worktree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Position within the unit. Tasks execute in ascending index order,
    /// subject to `depends_on`.
    pub index: u32,

    /// Human-readable title, used to derive the commit message and as part
    /// of the provider prompt.
    pub title: String,

    /// Full document body (the implementation-plan text for this task).
    pub body: String,

    /// Shell invocation whose successful exit (in the unit's worktree)
    /// defines task completion.
    pub backpressure: String,

    /// Indexes of tasks within the same unit that must complete first.
    pub depends_on: Vec<u32>,

    pub status: TaskStatus,
}

impl Task {
    pub fn new(
        index: u32,
        title: impl Into<String>,
        body: impl Into<String>,
        backpressure: impl Into<String>,
        depends_on: Vec<u32>,
    ) -> Self {
        Self {
            index,
            title: title.into(),
            body: body.into(),
            backpressure: backpressure.into(),
            depends_on,
            status: TaskStatus::Pending,
        }
    }

    /// Conventional-commit-ish message derived from the task title, used by
    /// the worker after a successful backpressure run.
    pub fn commit_message(&self) -> String {
        format!("feat: {}", self.title.trim())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrInfo {
    pub number: u64,
    pub html_url: String,
    pub branch: String,
    pub target_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A reaction on the PR's issue thread. Only `+1` ("approved") and `eyes`
/// ("in progress") reactions carry meaning for review-state derivation;
/// others are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Pending,
    InProgress,
    Approved,
    ChangesRequested,
}

#[derive(Debug, Clone)]
pub struct ReviewStatus {
    pub state: ReviewState,
    pub last_activity: DateTime<Utc>,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub completed: bool,
    pub conclusion_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallCheckStatus {
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct MergeResult {
    pub merged: bool,
    pub sha: Option<String>,
    pub message: String,
}

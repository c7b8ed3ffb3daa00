use async_trait::async_trait;

use crate::error::GitOpsError;

/// How forcefully to push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushForce {
    None,
    Force,
    ForceWithLease,
}

/// A path-scoped git façade. Every instance is bound to one repository
/// path; operations that mutate branch state are gated by the instance's
/// safety configuration (see [`crate::safety::SafetyConfig`]).
#[async_trait]
pub trait GitOperations: Send + Sync {
    async fn status(&self) -> Result<String, GitOpsError>;
    async fn rev_parse(&self, rev: &str) -> Result<String, GitOpsError>;
    async fn log(&self, range: Option<&str>, max_count: Option<u32>) -> Result<Vec<String>, GitOpsError>;
    async fn diff(&self, range: Option<&str>) -> Result<String, GitOpsError>;
    async fn current_branch(&self) -> Result<String, GitOpsError>;
    async fn branch_exists(&self, branch: &str) -> Result<bool, GitOpsError>;
    async fn checkout_branch(&self, branch: &str, create: bool, base: Option<&str>) -> Result<(), GitOpsError>;
    async fn add(&self, paths: &[String]) -> Result<(), GitOpsError>;
    async fn add_all(&self) -> Result<(), GitOpsError>;
    async fn reset(&self, rev: &str) -> Result<(), GitOpsError>;
    async fn commit(&self, message: &str) -> Result<String, GitOpsError>;
    async fn checkout_files(&self, paths: &[String]) -> Result<(), GitOpsError>;
    async fn clean(&self) -> Result<(), GitOpsError>;
    async fn reset_hard(&self, rev: &str) -> Result<(), GitOpsError>;
    async fn fetch(&self, remote: &str) -> Result<(), GitOpsError>;
    async fn push(&self, remote: &str, branch: &str, force: PushForce) -> Result<(), GitOpsError>;
    async fn merge(&self, branch: &str) -> Result<(), GitOpsError>;
    async fn merge_abort(&self) -> Result<(), GitOpsError>;
}

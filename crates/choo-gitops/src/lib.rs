//! Path-scoped git operations façade, shared by the real subprocess-backed
//! implementation and an in-memory test double, with a uniform
//! destructive-operation / protected-branch safety layer in front of both.

mod error;
mod memory;
mod ops;
mod repo;
pub mod safety;

pub use error::GitOpsError;
pub use memory::{InMemoryGitOps, RecordedCall};
pub use ops::{GitOperations, PushForce};
pub use repo::GitRepo;
pub use safety::{AuditLogger, AuditRecord, BranchGuard, SafetyConfig, TracingAuditLogger};

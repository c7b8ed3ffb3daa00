//! GitHub pull request client: open/comment/review-state/merge/checks,
//! plus the pure review-state and check-status derivation logic behind it.

mod client;
mod error;
mod fake;
mod rest;
mod review;
mod types;

pub use client::GithubClient;
pub use error::GithubError;
pub use fake::FakeGithubClient;
pub use rest::GithubRestClient;
pub use review::{derive_check_status, derive_review_status};
pub use types::{CheckRun, Comment, MergeResult, OverallCheckStatus, PrInfo, Reaction, ReviewStatus, ReviewState};

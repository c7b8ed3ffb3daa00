//! Job Manager errors (spec.md §4.7) and their HTTP status mapping
//! (SPEC_FULL.md §6), the way the teacher's services map domain errors to
//! `StatusCode`.

use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("invalid job configuration: {0}")]
    InvalidArgument(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job {0} is already in a terminal state")]
    Terminal(String),

    #[error("a non-terminal run already exists for this (feature branch, repo path)")]
    DuplicateRun,

    #[error("the daemon is shutting down and is not accepting new jobs")]
    Unavailable,

    #[error("shutdown already in progress")]
    AlreadyShuttingDown,

    #[error(transparent)]
    Store(#[from] choo_persistence::StoreError),

    #[error(transparent)]
    Discovery(#[from] choo_discovery::DiscoveryError),

    #[error(transparent)]
    Scheduler(#[from] choo_scheduler::SchedulerError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ManagerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ManagerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
            ManagerError::Terminal(_) | ManagerError::DuplicateRun | ManagerError::AlreadyShuttingDown => {
                StatusCode::CONFLICT
            }
            ManagerError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ManagerError::Store(_) | ManagerError::Discovery(_) | ManagerError::Scheduler(_) | ManagerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

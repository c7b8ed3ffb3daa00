#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("git operation failed: {0}")]
    Git(#[from] choo_gitops::GitOpsError),

    #[error("github operation failed: {0}")]
    Github(#[from] choo_github::GithubError),

    #[error("unit {unit} exhausted its retry budget on task {task}")]
    TaskExhausted { unit: String, task: u32 },

    #[error("unit {unit}'s review cycle exceeded its deadline")]
    ReviewDeadlineExceeded { unit: String },

    #[error("unit {unit} could not address review feedback within its retry budget")]
    FeedbackExhausted { unit: String },

    #[error("unit {unit} merge failed: {reason}")]
    MergeFailed { unit: String, reason: String },

    #[error("unit {unit} cancelled")]
    Cancelled { unit: String },
}

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GitOpsError {
    #[error("destructive operation {op} not allowed on {path} (allow_destructive is false)")]
    DestructiveNotAllowed { op: String, path: PathBuf },

    #[error("{op} refused: {branch} is a protected branch")]
    ProtectedBranch { op: String, branch: String },

    #[error("{op} refused: on branch {actual}, expected {expected}")]
    UnexpectedBranch {
        op: String,
        actual: String,
        expected: String,
    },

    #[error("git {op} failed (status {status}): {stderr}")]
    CommandFailed {
        op: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to launch git {op} in {path}: {source}")]
    Spawn {
        op: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("git produced non-UTF-8 output for {op}")]
    NonUtf8Output { op: String },
}

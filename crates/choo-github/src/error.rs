#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("github request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("github api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("pull request #{0} not found")]
    PrNotFound(u64),
}

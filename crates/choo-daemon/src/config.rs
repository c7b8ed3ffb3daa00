//! Daemon operational configuration, loaded from environment variables.
//! Parsing the tasks directory's document format is Discovery's job, not
//! this module's — this only covers how the daemon process itself runs.

use std::path::PathBuf;
use std::time::Duration;

/// Complete daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Default parallelism for jobs that don't specify one.
    pub default_parallelism: usize,
    /// Per-job event bus buffer capacity (spec.md §5 default: 1000).
    pub event_buffer_capacity: usize,
    /// How often the review poller checks a PR's review status.
    pub review_poll_interval: Duration,
    /// How long a unit's review cycle may run before it's escalated.
    pub review_deadline: Duration,
    /// Default graceful-shutdown timeout (spec.md §5 default: 30s).
    pub shutdown_timeout: Duration,
    /// PID file path; one daemon per user.
    pub pid_file: PathBuf,
    /// Unix-domain socket path for the control API.
    pub socket_path: PathBuf,
    /// Environment variable names passed through to provider/worker
    /// subprocesses (credentials for source control and the provider CLI,
    /// plus an SSH agent socket path when present).
    pub credential_passthrough: Vec<String>,
    /// GitHub API token used by the REST client.
    pub github_token: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            default_parallelism: 4,
            event_buffer_capacity: choo_eventbus::DEFAULT_BUFFER_CAPACITY,
            review_poll_interval: Duration::from_secs(30),
            review_deadline: Duration::from_secs(6 * 60 * 60),
            shutdown_timeout: Duration::from_secs(30),
            pid_file: PathBuf::from(format!("{home}/.choo/daemon.pid")),
            socket_path: PathBuf::from(format!("{home}/.choo/daemon.sock")),
            credential_passthrough: vec![
                "GITHUB_TOKEN".to_string(),
                "GH_TOKEN".to_string(),
                "SSH_AUTH_SOCK".to_string(),
            ],
            github_token: None,
        }
    }
}

impl DaemonConfig {
    /// Loads overrides from the environment (after `dotenvy::dotenv()` has
    /// had a chance to populate it from a `.env` file, if present).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("CHOO_DEFAULT_PARALLELISM") {
            if let Ok(n) = v.parse() {
                cfg.default_parallelism = n;
            }
        }
        if let Ok(v) = std::env::var("CHOO_EVENT_BUFFER_CAPACITY") {
            if let Ok(n) = v.parse() {
                cfg.event_buffer_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("CHOO_REVIEW_POLL_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                cfg.review_poll_interval = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("CHOO_REVIEW_DEADLINE_SECS") {
            if let Ok(n) = v.parse() {
                cfg.review_deadline = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("CHOO_SHUTDOWN_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                cfg.shutdown_timeout = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("CHOO_PID_FILE") {
            cfg.pid_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CHOO_SOCKET_PATH") {
            cfg.socket_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CHOO_CREDENTIAL_PASSTHROUGH") {
            cfg.credential_passthrough = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        cfg.github_token = std::env::var("GITHUB_TOKEN").ok().or_else(|| std::env::var("GH_TOKEN").ok());

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.default_parallelism, 4);
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(cfg.event_buffer_capacity, 1000);
    }
}

//! The code-generation Provider abstraction: one subprocess invocation per
//! task attempt, given a prompt on stdin and the unit's worktree as its
//! working directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to spawn provider command `{command}`: {source}")]
    Spawn { command: String, source: std::io::Error },

    #[error("failed to write provider log at {path}: {source}")]
    Log { path: PathBuf, source: std::io::Error },
}

/// One invocation of a provider against a single task attempt.
pub struct ProviderInvocation<'a> {
    pub unit_id: &'a str,
    pub task_index: u32,
    pub prompt: String,
    pub worktree: &'a Path,
    /// Where stdout/stderr for this invocation are teed to.
    pub log_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProviderOutcome {
    pub exit_success: bool,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// A code-generation provider: given a prompt and a worktree, produces file
/// changes directly in that worktree. The worker decides success via the
/// task's backpressure command, not via this trait's return value.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn run(&self, invocation: ProviderInvocation<'_>) -> Result<ProviderOutcome, ProviderError>;
}

/// The default provider: an external command (a coding-agent CLI) invoked
/// once per attempt, fed `prompt` on stdin.
pub struct SubprocessProvider {
    program: String,
    args: Vec<String>,
}

impl SubprocessProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

#[async_trait]
impl Provider for SubprocessProvider {
    async fn run(&self, invocation: ProviderInvocation<'_>) -> Result<ProviderOutcome, ProviderError> {
        tracing::debug!(
            unit = invocation.unit_id,
            task = invocation.task_index,
            program = %self.program,
            "invoking provider"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(invocation.worktree)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProviderError::Spawn { command: self.program.clone(), source })?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(invocation.prompt.as_bytes()).await;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| ProviderError::Spawn { command: self.program.clone(), source })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if let Some(parent) = invocation.log_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let mut log = tokio::fs::File::create(&invocation.log_path)
            .await
            .map_err(|source| ProviderError::Log { path: invocation.log_path.clone(), source })?;
        let _ = log
            .write_all(format!("=== stdout ===\n{stdout}\n=== stderr ===\n{stderr}\n").as_bytes())
            .await;

        Ok(ProviderOutcome {
            exit_success: output.status.success(),
            stdout_tail: tail(&stdout, 2000),
            stderr_tail: tail(&stderr, 2000),
        })
    }
}

pub(crate) fn tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        s.to_string()
    } else {
        s.chars().skip(count - max_chars).collect()
    }
}

/// A factory resolving a provider for a given unit. Per spec.md §4.4,
/// precedence (CLI flag > unit metadata > job > env > config > default) is
/// the caller's responsibility; the pool only consumes the resolved
/// factory function.
pub type ProviderFactory = std::sync::Arc<dyn Fn(&str) -> std::sync::Arc<dyn Provider> + Send + Sync>;

//! PID file handling: one daemon per user, advisory-locked, with stale
//! (process-not-running) files reclaimed on startup (spec.md §6).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("another choo daemon is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("failed to read/write pid file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Holds the pid file for the process's lifetime; removed on drop.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Acquires the pid file at `path`, reclaiming it if the recorded pid
    /// is no longer a live process.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, PidFileError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| PidFileError::Io { path: path.clone(), source })?;
        }

        if let Ok(existing) = fs::read_to_string(&path) {
            if let Ok(pid) = existing.trim().parse::<u32>() {
                if process_is_alive(pid) {
                    return Err(PidFileError::AlreadyRunning(pid));
                }
                tracing::warn!(pid, path = %path.display(), "reclaiming stale pid file");
            }
        }

        let mut file = fs::File::create(&path).map_err(|source| PidFileError::Io { path: path.clone(), source })?;
        write!(file, "{}", std::process::id()).map_err(|source| PidFileError::Io { path: path.clone(), source })?;

        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Checks whether `pid` names a live process, via `/proc` on Linux and
/// falling back to `kill -0` elsewhere.
fn process_is_alive(pid: u32) -> bool {
    if Path::new(&format!("/proc/{pid}")).exists() {
        return true;
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_current_pid() {
        let dir = std::env::temp_dir().join(format!("choo-pid-test-{}", std::process::id()));
        let path = dir.join("daemon.pid");
        let guard = PidFile::acquire(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, std::process::id().to_string());
        drop(guard);
        assert!(!path.exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_pid_is_reclaimed() {
        let dir = std::env::temp_dir().join(format!("choo-pid-test-stale-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("daemon.pid");
        fs::write(&path, "999999999").unwrap();

        let guard = PidFile::acquire(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, std::process::id().to_string());
        drop(guard);
        let _ = fs::remove_dir_all(&dir);
    }
}

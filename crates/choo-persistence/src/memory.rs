//! In-memory [`PersistenceStore`] implementation: sufficient for tests, dry
//! runs, and crash-recovery scenarios. All writes are visible to
//! subsequent reads under the same process as soon as the call returns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use choo_types::{Event, JobStatus};

use crate::store::{PersistenceStore, RunRecord, StoreError, UnitRecord};

fn unit_key(run_id: &str, unit_id: &str) -> String {
    format!("{run_id}_{unit_id}")
}

struct State {
    runs: HashMap<String, RunRecord>,
    units: HashMap<String, UnitRecord>,
    events: HashMap<String, Vec<Event>>,
    next_sequence: HashMap<String, i64>,
}

/// The reference `PersistenceStore` implementation this workspace ships.
/// A real SQL-backed store implements the same trait and is out of scope.
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                runs: HashMap::new(),
                units: HashMap::new(),
                events: HashMap::new(),
                next_sequence: HashMap::new(),
            }),
        }
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn create_run(&self, run: RunRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let collides = state.runs.values().any(|existing| {
            !existing.status.is_terminal()
                && existing.feature_branch == run.feature_branch
                && existing.repo_path == run.repo_path
        });
        if collides {
            return Err(StoreError::DuplicateRun {
                branch: run.feature_branch,
                repo_path: run.repo_path,
            });
        }
        state.runs.insert(run.id.clone(), run);
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<RunRecord, StoreError> {
        self.state
            .lock()
            .unwrap()
            .runs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(id.to_string()))
    }

    async fn get_run_by_branch(&self, branch: &str, repo_path: &Path) -> Result<Option<RunRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .runs
            .values()
            .find(|r| r.feature_branch == branch && r.repo_path == repo_path)
            .cloned())
    }

    async fn update_run_status(&self, id: &str, status: JobStatus, error: Option<String>) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let run = state.runs.get_mut(id).ok_or_else(|| StoreError::RunNotFound(id.to_string()))?;

        if status == JobStatus::Running && run.started_at.is_none() {
            run.started_at = Some(chrono::Utc::now());
        }
        if status.is_terminal() && run.completed_at.is_none() {
            run.completed_at = Some(chrono::Utc::now());
        }
        run.status = status;
        if error.is_some() {
            run.error = error;
        }
        Ok(())
    }

    async fn list_runs_by_status(&self, status: JobStatus) -> Result<Vec<RunRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .runs
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn list_incomplete_runs(&self) -> Result<Vec<RunRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .runs
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn delete_run(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.runs.remove(id).is_none() {
            return Err(StoreError::RunNotFound(id.to_string()));
        }
        state.units.retain(|_, u| u.run_id != id);
        state.events.remove(id);
        state.next_sequence.remove(id);
        Ok(())
    }

    async fn create_unit(&self, unit: UnitRecord) -> Result<(), StoreError> {
        let key = unit_key(&unit.run_id, &unit.unit_id);
        self.state.lock().unwrap().units.insert(key, unit);
        Ok(())
    }

    async fn get_unit(&self, run_id: &str, unit_id: &str) -> Result<UnitRecord, StoreError> {
        self.state
            .lock()
            .unwrap()
            .units
            .get(&unit_key(run_id, unit_id))
            .cloned()
            .ok_or_else(|| StoreError::UnitNotFound {
                run_id: run_id.to_string(),
                unit_id: unit_id.to_string(),
            })
    }

    async fn update_unit_status(
        &self,
        run_id: &str,
        unit_id: &str,
        status: choo_types::UnitStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let unit = state
            .units
            .get_mut(&unit_key(run_id, unit_id))
            .ok_or_else(|| StoreError::UnitNotFound {
                run_id: run_id.to_string(),
                unit_id: unit_id.to_string(),
            })?;
        unit.status = status;
        if error.is_some() {
            unit.error = error;
        }
        Ok(())
    }

    async fn update_unit_branch(
        &self,
        run_id: &str,
        unit_id: &str,
        branch: String,
        worktree: PathBuf,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let unit = state
            .units
            .get_mut(&unit_key(run_id, unit_id))
            .ok_or_else(|| StoreError::UnitNotFound {
                run_id: run_id.to_string(),
                unit_id: unit_id.to_string(),
            })?;
        unit.branch = Some(branch);
        unit.worktree = Some(worktree);
        Ok(())
    }

    async fn list_units_by_run(&self, run_id: &str) -> Result<Vec<UnitRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .units
            .values()
            .filter(|u| u.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn list_units_by_status(&self, run_id: &str, status: choo_types::UnitStatus) -> Result<Vec<UnitRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .units
            .values()
            .filter(|u| u.run_id == run_id && u.status == status)
            .cloned()
            .collect())
    }

    async fn append_event(&self, run_id: &str, mut event: Event) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        let sequence = match event.sequence {
            Some(seq) => seq,
            None => {
                let next = state.next_sequence.entry(run_id.to_string()).or_insert(0);
                *next += 1;
                *next
            }
        };
        event.sequence = Some(sequence);
        let watermark = state.next_sequence.entry(run_id.to_string()).or_insert(0);
        if sequence > *watermark {
            *watermark = sequence;
        }
        state.events.entry(run_id.to_string()).or_default().push(event);
        Ok(sequence)
    }

    async fn list_events(&self, run_id: &str, from_sequence: i64, limit: Option<usize>) -> Result<Vec<Event>, StoreError> {
        let state = self.state.lock().unwrap();
        let events = state.events.get(run_id).cloned().unwrap_or_default();
        let mut filtered: Vec<Event> = events
            .into_iter()
            .filter(|e| e.sequence.map(|s| s >= from_sequence).unwrap_or(false))
            .collect();
        if let Some(limit) = limit {
            filtered.truncate(limit);
        }
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use choo_types::UnitStatus;

    fn run(id: &str, branch: &str) -> RunRecord {
        RunRecord {
            id: id.to_string(),
            repo_path: PathBuf::from("/repo"),
            tasks_dir: PathBuf::from("/repo/.tasks"),
            target_branch: "main".to_string(),
            feature_branch: branch.to_string(),
            parallelism: 2,
            status: JobStatus::Pending,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn duplicate_non_terminal_branch_rejected() {
        let store = InMemoryStore::new();
        store.create_run(run("job-1", "choo/job-1")).await.unwrap();
        let err = store.create_run(run("job-2", "choo/job-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRun { .. }));
    }

    #[tokio::test]
    async fn terminal_run_does_not_block_reuse_of_branch() {
        let store = InMemoryStore::new();
        store.create_run(run("job-1", "choo/job-1")).await.unwrap();
        store.update_run_status("job-1", JobStatus::Completed, None).await.unwrap();
        store.create_run(run("job-2", "choo/job-1")).await.unwrap();
    }

    #[tokio::test]
    async fn update_run_status_stamps_timestamps_once() {
        let store = InMemoryStore::new();
        store.create_run(run("job-1", "choo/job-1")).await.unwrap();
        store.update_run_status("job-1", JobStatus::Running, None).await.unwrap();
        let first = store.get_run("job-1").await.unwrap();
        assert!(first.started_at.is_some());

        store.update_run_status("job-1", JobStatus::Completed, None).await.unwrap();
        let second = store.get_run("job-1").await.unwrap();
        assert_eq!(second.started_at, first.started_at);
        assert!(second.completed_at.is_some());
    }

    #[tokio::test]
    async fn delete_run_cascades_to_units_and_events() {
        let store = InMemoryStore::new();
        store.create_run(run("job-1", "choo/job-1")).await.unwrap();
        store
            .create_unit(UnitRecord {
                run_id: "job-1".to_string(),
                unit_id: "a".to_string(),
                status: UnitStatus::Pending,
                branch: None,
                worktree: None,
                pr_number: None,
                started_at: None,
                completed_at: None,
                error: None,
            })
            .await
            .unwrap();
        store
            .append_event("job-1", Event::new(choo_types::EventKind::OrchStarted, serde_json::json!({})))
            .await
            .unwrap();

        store.delete_run("job-1").await.unwrap();
        assert!(store.get_unit("job-1", "a").await.is_err());
        assert_eq!(store.list_events("job-1", 0, None).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn event_log_assigns_increasing_sequence_per_run() {
        let store = InMemoryStore::new();
        let s1 = store
            .append_event("job-1", Event::new(choo_types::EventKind::OrchStarted, serde_json::json!({})))
            .await
            .unwrap();
        let s2 = store
            .append_event("job-1", Event::new(choo_types::EventKind::OrchCompleted, serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!((s1, s2), (1, 2));

        let events = store.list_events("job-1", 2, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence, Some(2));
    }
}

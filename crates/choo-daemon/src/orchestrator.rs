//! The Orchestrator: the long-lived supervisory task that drives one job's
//! scheduler and worker pool to completion, persisting every state
//! transition as it happens (spec.md §4.7, §5).
//!
//! Grounded on `durable/src/bench/runner.rs`'s `JoinSet`-driven concurrent
//! dispatch loop and `durable/src/worker/poller.rs`'s
//! `tokio::select!`-over-a-watch-channel cancellation shape.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use choo_eventbus::EventBus;
use choo_persistence::{PersistenceStore, StoreError, UnitRecord};
use choo_scheduler::{DispatchOutcome, Scheduler, SchedulerError};
use choo_types::{Event, EventKind, Unit, UnitStatus};
use choo_worker::WorkerPool;
use tokio::sync::watch;
use tokio::task::JoinSet;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pool(#[from] choo_worker::PoolError),
}

/// Outcome of running a job's unit DAG to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorOutcome {
    AllComplete,
    SomeBlocked,
}

pub struct Orchestrator {
    run_id: String,
    scheduler: Arc<Scheduler>,
    pool: Arc<WorkerPool>,
    store: Arc<dyn PersistenceStore>,
    bus: EventBus,
    last_known: Mutex<HashMap<String, UnitStatus>>,
}

impl Orchestrator {
    pub fn new(run_id: impl Into<String>, scheduler: Arc<Scheduler>, pool: Arc<WorkerPool>, store: Arc<dyn PersistenceStore>, bus: EventBus) -> Self {
        Self { run_id: run_id.into(), scheduler, pool, store, bus, last_known: Mutex::new(HashMap::new()) }
    }

    /// Schedules `units`, persists their initial records, then dispatches
    /// and collects worker outcomes until the DAG is fully resolved or
    /// `cancel` fires. Returns once no unit can make further progress.
    pub async fn run(&self, units: Vec<Unit>, mut cancel: watch::Receiver<bool>) -> Result<OrchestratorOutcome, OrchestratorError> {
        self.bus.publish(Event::new(EventKind::OrchStarted, serde_json::json!({})));
        self.scheduler.schedule(units)?;

        for unit in self.scheduler.snapshot() {
            self.last_known.lock().unwrap().insert(unit.id.clone(), unit.status);
            self.store
                .create_unit(UnitRecord {
                    run_id: self.run_id.clone(),
                    unit_id: unit.id.clone(),
                    status: unit.status,
                    branch: None,
                    worktree: None,
                    pr_number: None,
                    started_at: None,
                    completed_at: None,
                    error: None,
                })
                .await?;
        }

        let mut in_flight: JoinSet<(Unit, Result<(), choo_worker::WorkerError>)> = JoinSet::new();

        loop {
            if *cancel.borrow() {
                break;
            }

            match self.scheduler.dispatch() {
                DispatchOutcome::Dispatched(unit_id) => {
                    let unit = self
                        .scheduler
                        .snapshot()
                        .into_iter()
                        .find(|u| u.id == unit_id)
                        .expect("dispatched unit exists in snapshot");
                    self.mark_persisted(&unit.id, unit.status, None).await?;
                    let handle = self.pool.submit(unit).await?;
                    in_flight.spawn(async move { handle.await.expect("worker task panicked") });
                }
                DispatchOutcome::AtCapacity | DispatchOutcome::NoReady => {
                    tokio::select! {
                        joined = in_flight.join_next(), if !in_flight.is_empty() => {
                            if let Some(Ok((unit, result))) = joined {
                                self.record_outcome(&unit, result).await?;
                            }
                        }
                        _ = cancel.changed() => {}
                    }
                }
                DispatchOutcome::AllComplete => {
                    self.drain(&mut in_flight).await?;
                    // `dispatch()` reports `AllComplete` once nothing pending
                    // remains to dispatch, even when the run leaves failed or
                    // blocked units behind (DESIGN.md Open Question #4) — the
                    // caller must consult `has_failures()` to tell a clean
                    // finish from a partially-failed one.
                    if self.scheduler.has_failures() {
                        self.bus.publish(
                            Event::new(EventKind::OrchFailed, serde_json::json!({}))
                                .with_error("one or more units failed or were blocked"),
                        );
                        return Ok(OrchestratorOutcome::SomeBlocked);
                    }
                    self.bus.publish(Event::new(EventKind::OrchCompleted, serde_json::json!({})));
                    return Ok(OrchestratorOutcome::AllComplete);
                }
                DispatchOutcome::AllBlocked => {
                    self.drain(&mut in_flight).await?;
                    self.bus.publish(
                        Event::new(EventKind::OrchFailed, serde_json::json!({}))
                            .with_error("one or more units are permanently blocked"),
                    );
                    return Ok(OrchestratorOutcome::SomeBlocked);
                }
            }
        }

        self.drain(&mut in_flight).await?;
        Ok(OrchestratorOutcome::SomeBlocked)
    }

    async fn drain(&self, in_flight: &mut JoinSet<(Unit, Result<(), choo_worker::WorkerError>)>) -> Result<(), OrchestratorError> {
        while let Some(joined) = in_flight.join_next().await {
            if let Ok((unit, result)) = joined {
                self.record_outcome(&unit, result).await?;
            }
        }
        Ok(())
    }

    async fn record_outcome(&self, unit: &Unit, result: Result<(), choo_worker::WorkerError>) -> Result<(), OrchestratorError> {
        if let (Some(branch), Some(worktree)) = (&unit.branch, &unit.worktree) {
            self.store.update_unit_branch(&self.run_id, &unit.id, branch.clone(), worktree.clone()).await?;
        }

        match result {
            Ok(()) => {
                self.scheduler.complete(&unit.id)?;
                self.mark_persisted(&unit.id, UnitStatus::Complete, None).await?;
                // `complete()` promotes newly-unblocked pending units to ready.
                self.persist_status_deltas().await?;
            }
            Err(e) => {
                let reason = e.to_string();
                self.scheduler.fail(&unit.id, reason.clone())?;
                self.mark_persisted(&unit.id, UnitStatus::Failed, Some(reason)).await?;
                // `fail()` transitively blocks pending dependents; persist
                // every status the scheduler changed that we haven't yet.
                self.persist_status_deltas().await?;
            }
        }
        Ok(())
    }

    async fn mark_persisted(&self, unit_id: &str, status: UnitStatus, error: Option<String>) -> Result<(), OrchestratorError> {
        self.last_known.lock().unwrap().insert(unit_id.to_string(), status);
        self.store.update_unit_status(&self.run_id, unit_id, status, error).await?;
        Ok(())
    }

    async fn persist_status_deltas(&self) -> Result<(), OrchestratorError> {
        let changed: Vec<(String, UnitStatus)> = {
            let mut last_known = self.last_known.lock().unwrap();
            self.scheduler
                .snapshot()
                .into_iter()
                .filter_map(|u| {
                    let changed = last_known.get(&u.id) != Some(&u.status);
                    if changed {
                        last_known.insert(u.id.clone(), u.status);
                        Some((u.id, u.status))
                    } else {
                        None
                    }
                })
                .collect()
        };
        for (unit_id, status) in changed {
            self.store.update_unit_status(&self.run_id, &unit_id, status, None).await?;
        }
        Ok(())
    }
}

//! Scheduler: owns the unit state machine, the FIFO ready queue, and the
//! dispatch policy. Performs no I/O; every suspension point lives in the
//! worker that dispatch() hands a unit to.

mod transitions;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::Utc;
use choo_eventbus::EventBus;
use choo_types::{Event, EventKind, Graph, GraphError, Level, Unit, UnitStatus};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("dependency cycle detected, involving units: {0:?}")]
    Cycle(Vec<String>),

    #[error("unit {unit} depends on unknown unit {missing}")]
    MissingDependency { unit: String, missing: String },

    #[error("schedule() may only be called once per scheduler")]
    AlreadyScheduled,

    #[error("unknown unit {0}")]
    UnitNotFound(String),

    #[error("invalid transition for unit {unit}: {from} -> {to}")]
    InvalidTransition {
        unit: String,
        from: UnitStatus,
        to: UnitStatus,
    },
}

impl From<GraphError> for SchedulerError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Cycle(units) => SchedulerError::Cycle(units),
            GraphError::MissingDependency { unit, missing } => {
                SchedulerError::MissingDependency { unit, missing }
            }
        }
    }
}

/// Result of a single `dispatch()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A unit was moved `ready -> in_progress`; the caller should hand it
    /// to a worker.
    Dispatched(String),
    /// The parallelism cap is already saturated.
    AtCapacity,
    /// The ready queue is empty but some unit is still active (or
    /// `schedule()` hasn't run yet) — try again once something completes.
    NoReady,
    /// Every unit reached a terminal state with none failed or blocked.
    AllComplete,
    /// The ready queue is empty, nothing is active, and at least one unit
    /// is still pending — nothing left can ever unblock it.
    AllBlocked,
}

struct State {
    units: HashMap<String, Unit>,
    graph: Option<Graph>,
    ready_queue: VecDeque<String>,
    scheduled: bool,
}

/// Owns one job's unit state machine. All mutators are serialized by a
/// single lock; read queries take the same lock but never block on I/O, so
/// contention is brief.
pub struct Scheduler {
    state: Mutex<State>,
    parallelism: usize,
    bus: EventBus,
}

fn event_kind_for(to: UnitStatus) -> EventKind {
    match to {
        UnitStatus::Ready => EventKind::UnitQueued,
        UnitStatus::InProgress => EventKind::UnitStarted,
        UnitStatus::PrOpen => EventKind::UnitPrOpen,
        UnitStatus::InReview => EventKind::UnitInReview,
        UnitStatus::Merging => EventKind::UnitMerging,
        UnitStatus::Complete => EventKind::UnitCompleted,
        UnitStatus::Failed => EventKind::UnitFailed,
        UnitStatus::Blocked => EventKind::UnitBlocked,
        UnitStatus::Pending => unreachable!("no transition targets Pending"),
    }
}

impl Scheduler {
    pub fn new(parallelism: usize, bus: EventBus) -> Self {
        Self {
            state: Mutex::new(State {
                units: HashMap::new(),
                graph: None,
                ready_queue: VecDeque::new(),
                scheduled: false,
            }),
            parallelism: parallelism.max(1),
            bus,
        }
    }

    /// Build the dependency graph, seed every zero-dependency unit as
    /// `ready`, and return the topological order and level partition.
    /// May only be called once.
    pub fn schedule(&self, units: Vec<Unit>) -> Result<(Vec<String>, Vec<Level>), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        if state.scheduled {
            return Err(SchedulerError::AlreadyScheduled);
        }

        let graph = Graph::build(&units)?;
        let order = graph.topological_order().to_vec();
        let levels = graph.levels().to_vec();

        let mut ready_now = Vec::new();
        for mut unit in units {
            unit.status = UnitStatus::Pending;
            if unit.depends_on.is_empty() {
                unit.status = UnitStatus::Ready;
                ready_now.push(unit.id.clone());
            }
            state.units.insert(unit.id.clone(), unit);
        }
        ready_now.sort();
        state.ready_queue.extend(ready_now.iter().cloned());
        state.graph = Some(graph);
        state.scheduled = true;
        drop(state);

        for id in ready_now {
            self.bus
                .publish(Event::new(EventKind::UnitQueued, serde_json::json!({})).with_unit(id));
        }

        Ok((order, levels))
    }

    /// Synchronous, non-blocking. Hands out at most one unit per call.
    pub fn dispatch(&self) -> DispatchOutcome {
        {
            let state = self.state.lock().unwrap();
            if !state.scheduled {
                return DispatchOutcome::NoReady;
            }

            let active = state.units.values().filter(|u| u.status.is_active()).count();
            if active >= self.parallelism {
                return DispatchOutcome::AtCapacity;
            }
        }

        let next = {
            let mut state = self.state.lock().unwrap();
            state.ready_queue.pop_front()
        };

        if let Some(unit_id) = next {
            self.transition(&unit_id, UnitStatus::InProgress)
                .expect("ready -> in_progress is always allowed");
            return DispatchOutcome::Dispatched(unit_id);
        }

        let state = self.state.lock().unwrap();
        let active = state.units.values().filter(|u| u.status.is_active()).count();
        let pending = state
            .units
            .values()
            .filter(|u| u.status == UnitStatus::Pending)
            .count();

        if active > 0 {
            DispatchOutcome::NoReady
        } else if pending > 0 {
            DispatchOutcome::AllBlocked
        } else {
            DispatchOutcome::AllComplete
        }
    }

    /// Mark a unit complete and promote any now-unblocked pending units to
    /// `ready`.
    pub fn complete(&self, unit_id: &str) -> Result<(), SchedulerError> {
        self.transition(unit_id, UnitStatus::Complete)?;
        self.promote_newly_ready();
        Ok(())
    }

    /// Mark a unit failed and transitively block every pending unit that
    /// depends on it. Units already `ready` are left alone — they were
    /// already dispatched-eligible and are allowed to be picked up; the
    /// worker discovers the broken dependency when it materializes its
    /// worktree.
    pub fn fail(&self, unit_id: &str, err: impl Into<String>) -> Result<(), SchedulerError> {
        let message = err.into();
        {
            let mut state = self.state.lock().unwrap();
            let unit = state
                .units
                .get_mut(unit_id)
                .ok_or_else(|| SchedulerError::UnitNotFound(unit_id.to_string()))?;
            unit.error = Some(message);
        }
        self.transition(unit_id, UnitStatus::Failed)?;
        self.propagate_blocked(unit_id);
        Ok(())
    }

    /// The sole state mutator. Validates against the allowed-transitions
    /// table, applies bookkeeping (`started_at`/`completed_at`, ready
    /// queue membership), and emits the corresponding event.
    pub fn transition(&self, unit_id: &str, to: UnitStatus) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().unwrap();
        let from = {
            let unit = state
                .units
                .get(unit_id)
                .ok_or_else(|| SchedulerError::UnitNotFound(unit_id.to_string()))?;
            unit.status
        };

        if !transitions::is_allowed(from, to) {
            tracing::warn!(unit = unit_id, %from, %to, "rejected invalid unit transition");
            return Err(SchedulerError::InvalidTransition {
                unit: unit_id.to_string(),
                from,
                to,
            });
        }
        tracing::debug!(unit = unit_id, %from, %to, "unit transition");

        {
            let unit = state.units.get_mut(unit_id).unwrap();
            unit.status = to;
            match to {
                UnitStatus::InProgress => unit.started_at = Some(Utc::now()),
                UnitStatus::Complete => unit.completed_at = Some(Utc::now()),
                _ => {}
            }
        }

        if to == UnitStatus::Ready && !state.ready_queue.contains(&unit_id.to_string()) {
            state.ready_queue.push_back(unit_id.to_string());
        }
        drop(state);

        let mut event = Event::new(event_kind_for(to), serde_json::json!({}))
            .with_unit(unit_id.to_string());
        if to == UnitStatus::Failed {
            let state = self.state.lock().unwrap();
            if let Some(reason) = state.units.get(unit_id).and_then(|u| u.error.clone()) {
                drop(state);
                event = event.with_error(reason);
            }
        }
        self.bus.publish(event);

        Ok(())
    }

    fn promote_newly_ready(&self) {
        let newly_ready: Vec<String> = {
            let state = self.state.lock().unwrap();
            state
                .units
                .values()
                .filter(|u| u.status == UnitStatus::Pending)
                .filter(|u| {
                    u.depends_on.iter().all(|dep| {
                        state
                            .units
                            .get(dep)
                            .map(|d| d.status == UnitStatus::Complete)
                            .unwrap_or(false)
                    })
                })
                .map(|u| u.id.clone())
                .collect()
        };

        let mut newly_ready = newly_ready;
        newly_ready.sort();
        for id in newly_ready {
            let _ = self.transition(&id, UnitStatus::Ready);
        }
    }

    fn propagate_blocked(&self, failed_unit_id: &str) {
        let dependents: Vec<String> = {
            let state = self.state.lock().unwrap();
            match &state.graph {
                Some(graph) => graph.transitive_dependents(failed_unit_id).into_iter().collect(),
                None => Vec::new(),
            }
        };

        for id in dependents {
            let is_pending = {
                let state = self.state.lock().unwrap();
                state.units.get(&id).map(|u| u.status == UnitStatus::Pending)
            };
            if is_pending == Some(true) {
                let _ = self.transition(&id, UnitStatus::Blocked);
            }
        }
    }

    pub fn get_state(&self, unit_id: &str) -> Option<UnitStatus> {
        self.state.lock().unwrap().units.get(unit_id).map(|u| u.status)
    }

    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .units
            .values()
            .filter(|u| u.status.is_active())
            .count()
    }

    pub fn is_complete(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.scheduled && state.units.values().all(|u| u.status.is_terminal())
    }

    pub fn has_failures(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .units
            .values()
            .any(|u| matches!(u.status, UnitStatus::Failed | UnitStatus::Blocked))
    }

    pub fn snapshot(&self) -> Vec<Unit> {
        let mut units: Vec<Unit> = self.state.lock().unwrap().units.values().cloned().collect();
        units.sort_by(|a, b| a.id.cmp(&b.id));
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use choo_types::Task;

    fn unit(id: &str, deps: &[&str]) -> Unit {
        Unit::new(
            id,
            vec![Task::new(0, "t", "", "exit 0", vec![])],
            deps.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn scheduler(parallelism: usize) -> Scheduler {
        Scheduler::new(parallelism, EventBus::new("job-1"))
    }

    #[test]
    fn linear_dag_happy_path() {
        let sched = scheduler(1);
        sched
            .schedule(vec![unit("a", &[]), unit("b", &["a"]), unit("c", &["b"])])
            .unwrap();

        for id in ["a", "b", "c"] {
            assert_eq!(sched.dispatch(), DispatchOutcome::Dispatched(id.to_string()));
            assert_eq!(sched.dispatch(), DispatchOutcome::AtCapacity);
            sched.complete(id).unwrap();
        }

        assert_eq!(sched.dispatch(), DispatchOutcome::AllComplete);
        assert!(sched.is_complete());
        assert!(!sched.has_failures());
    }

    #[test]
    fn parallelism_respected_at_same_level() {
        let sched = scheduler(1);
        sched
            .schedule(vec![unit("a", &[]), unit("b", &[]), unit("c", &["a", "b"])])
            .unwrap();

        assert_eq!(sched.dispatch(), DispatchOutcome::Dispatched("a".to_string()));
        assert_eq!(sched.dispatch(), DispatchOutcome::AtCapacity);
        sched.complete("a").unwrap();
        assert_eq!(sched.dispatch(), DispatchOutcome::Dispatched("b".to_string()));
        sched.complete("b").unwrap();
        assert_eq!(sched.dispatch(), DispatchOutcome::Dispatched("c".to_string()));
    }

    #[test]
    fn failure_blocks_transitive_pending_dependents() {
        let sched = scheduler(2);
        sched
            .schedule(vec![
                unit("a", &[]),
                unit("b", &["a"]),
                unit("c", &["a"]),
                unit("d", &["b", "c"]),
            ])
            .unwrap();

        assert_eq!(sched.dispatch(), DispatchOutcome::Dispatched("a".to_string()));
        sched.fail("a", "provider crashed").unwrap();

        assert_eq!(sched.get_state("b"), Some(UnitStatus::Blocked));
        assert_eq!(sched.get_state("c"), Some(UnitStatus::Blocked));
        assert_eq!(sched.get_state("d"), Some(UnitStatus::Pending));
        assert_eq!(sched.dispatch(), DispatchOutcome::AllBlocked);
        assert!(sched.has_failures());
    }

    #[test]
    fn dispatched_ready_unit_is_not_retroactively_blocked() {
        let sched = scheduler(2);
        sched
            .schedule(vec![unit("a", &[]), unit("b", &[]), unit("c", &["a", "b"])])
            .unwrap();

        // a and b are both ready; dispatch a, then fail b while it's still
        // queued (not dispatched) -- only pending units get blocked, but b
        // is ready, so it stays ready per the spec's "not ready -> blocked"
        // carve-out.
        assert_eq!(sched.dispatch(), DispatchOutcome::Dispatched("a".to_string()));
        sched.fail("a", "boom").unwrap();
        assert_eq!(sched.get_state("c"), Some(UnitStatus::Blocked));
        assert_eq!(sched.get_state("b"), Some(UnitStatus::Ready));
    }

    #[test]
    fn schedule_rejects_cycle() {
        let sched = scheduler(1);
        let err = sched
            .schedule(vec![unit("a", &["b"]), unit("b", &["a"])])
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Cycle(_)));
    }

    #[test]
    fn schedule_twice_is_rejected() {
        let sched = scheduler(1);
        sched.schedule(vec![unit("a", &[])]).unwrap();
        let err = sched.schedule(vec![unit("a", &[])]).unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyScheduled));
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let sched = scheduler(1);
        sched.schedule(vec![unit("a", &[])]).unwrap();
        let err = sched.transition("a", UnitStatus::Complete).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
    }
}

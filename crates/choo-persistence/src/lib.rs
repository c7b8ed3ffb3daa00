//! Persistence Interface (spec.md §4.8): a pluggable store for runs, units,
//! and per-run event logs, plus an in-memory reference implementation.

mod memory;
mod store;

pub use memory::InMemoryStore;
pub use store::{PersistenceStore, RunRecord, StoreError, UnitRecord};

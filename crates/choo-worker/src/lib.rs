//! Worker lifecycle, worker pool, and the Provider/Escalator abstractions
//! it depends on (spec.md §4.4, §4.9).

mod error;
mod escalation;
mod pool;
mod provider;
mod retry;
mod worker;

pub use error::WorkerError;
pub use escalation::{Escalation, EscalationError, Escalator, MultiEscalator, Severity, TracingEscalator};
pub use pool::{PoolError, WorkerPool};
pub use provider::{Provider, ProviderError, ProviderFactory, ProviderInvocation, ProviderOutcome, SubprocessProvider};
pub use retry::RetryPolicy;
pub use worker::{Worker, WorkerConfig};

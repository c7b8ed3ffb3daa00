//! Escalator (spec.md §4.9): surfaces unit-level problems that the worker
//! cannot resolve itself to whatever sinks the daemon is configured with.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Blocking,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Blocking => "blocking",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct Escalation {
    pub severity: Severity,
    pub unit_id: String,
    pub title: String,
    pub message: String,
    pub context: HashMap<String, String>,
}

impl Escalation {
    pub fn new(severity: Severity, unit_id: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            unit_id: unit_id.into(),
            title: title.into(),
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
#[error("escalation sink {sink} failed: {reason}")]
pub struct EscalationError {
    pub sink: String,
    pub reason: String,
}

#[async_trait]
pub trait Escalator: Send + Sync {
    fn name(&self) -> &str;
    async fn escalate(&self, escalation: &Escalation) -> Result<(), EscalationError>;
}

/// Logs the escalation at a level matching its severity. The default sink
/// when no richer integration (pager, chat webhook) is configured.
pub struct TracingEscalator;

#[async_trait]
impl Escalator for TracingEscalator {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn escalate(&self, escalation: &Escalation) -> Result<(), EscalationError> {
        let unit = &escalation.unit_id;
        let title = &escalation.title;
        let message = &escalation.message;
        match escalation.severity {
            Severity::Info => tracing::info!(unit, title, message, "escalation"),
            Severity::Warning => tracing::warn!(unit, title, message, "escalation"),
            Severity::Critical | Severity::Blocking => tracing::error!(unit, title, message, "escalation"),
        }
        Ok(())
    }
}

/// Fans out an escalation to every configured sink concurrently. Every
/// sink is always invoked; if more than one fails, the first failure (by
/// sink order) is returned.
pub struct MultiEscalator {
    sinks: Vec<Arc<dyn Escalator>>,
}

impl MultiEscalator {
    pub fn new(sinks: Vec<Arc<dyn Escalator>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl Escalator for MultiEscalator {
    fn name(&self) -> &str {
        "multi"
    }

    async fn escalate(&self, escalation: &Escalation) -> Result<(), EscalationError> {
        let futures = self.sinks.iter().map(|sink| sink.escalate(escalation));
        let results = futures::future::join_all(futures).await;
        results.into_iter().find(|r| r.is_err()).unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Escalator for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }
        async fn escalate(&self, _escalation: &Escalation) -> Result<(), EscalationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(EscalationError { sink: "counting".into(), reason: "boom".into() })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn every_sink_invoked_even_if_one_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let multi = MultiEscalator::new(vec![
            Arc::new(CountingSink { calls: calls.clone(), fail: true }),
            Arc::new(CountingSink { calls: calls.clone(), fail: false }),
        ]);

        let escalation = Escalation::new(Severity::Blocking, "unit-a", "title", "message");
        let result = multi.escalate(&escalation).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

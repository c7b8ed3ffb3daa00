//! Typed events published on the job's event bus and carried on the wire.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The enumerated event types from spec.md §6.
///
/// Unknown type strings (e.g. an external producer's `spec.review.*`
/// events) are preserved verbatim via [`EventKind::Other`] rather than
/// rejected — the wire format promises round-tripping of event types it
/// doesn't know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    OrchStarted,
    OrchCompleted,
    OrchFailed,
    UnitQueued,
    UnitStarted,
    UnitPrOpen,
    UnitInReview,
    UnitMerging,
    UnitCompleted,
    UnitFailed,
    UnitBlocked,
    TaskStarted,
    TaskProviderInvoke,
    TaskProviderDone,
    TaskCompleted,
    TaskFailed,
    PrFeedbackAddressed,
    /// Any type string not enumerated above, preserved verbatim.
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::OrchStarted => "orch.started",
            EventKind::OrchCompleted => "orch.completed",
            EventKind::OrchFailed => "orch.failed",
            EventKind::UnitQueued => "unit.queued",
            EventKind::UnitStarted => "unit.started",
            EventKind::UnitPrOpen => "unit.pr_open",
            EventKind::UnitInReview => "unit.in_review",
            EventKind::UnitMerging => "unit.merging",
            EventKind::UnitCompleted => "unit.completed",
            EventKind::UnitFailed => "unit.failed",
            EventKind::UnitBlocked => "unit.blocked",
            EventKind::TaskStarted => "task.started",
            EventKind::TaskProviderInvoke => "task.provider_invoke",
            EventKind::TaskProviderDone => "task.provider_done",
            EventKind::TaskCompleted => "task.completed",
            EventKind::TaskFailed => "task.failed",
            EventKind::PrFeedbackAddressed => "pr.feedback_addressed",
            EventKind::Other(s) => s,
        }
    }

    /// Whether this event type represents a unit or task failure — used by
    /// the event bus's persistence sink and by tests asserting ordering of
    /// failure propagation.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventKind::OrchFailed | EventKind::UnitFailed | EventKind::TaskFailed
        )
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "orch.started" => EventKind::OrchStarted,
            "orch.completed" => EventKind::OrchCompleted,
            "orch.failed" => EventKind::OrchFailed,
            "unit.queued" => EventKind::UnitQueued,
            "unit.started" => EventKind::UnitStarted,
            "unit.pr_open" => EventKind::UnitPrOpen,
            "unit.in_review" => EventKind::UnitInReview,
            "unit.merging" => EventKind::UnitMerging,
            "unit.completed" => EventKind::UnitCompleted,
            "unit.failed" => EventKind::UnitFailed,
            "unit.blocked" => EventKind::UnitBlocked,
            "task.started" => EventKind::TaskStarted,
            "task.provider_invoke" => EventKind::TaskProviderInvoke,
            "task.provider_done" => EventKind::TaskProviderDone,
            "task.completed" => EventKind::TaskCompleted,
            "task.failed" => EventKind::TaskFailed,
            "pr.feedback_addressed" => EventKind::PrFeedbackAddressed,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(D::Error::custom("event type must not be empty"));
        }
        Ok(EventKind::from(s.as_str()))
    }
}

/// A single event on a job's event bus.
///
/// `sequence` is assigned by the bus on publish and is required once an
/// event reaches persistence; it may be absent momentarily on events
/// produced outside the bus (e.g. by an external producer before it is
/// published).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventKind,

    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sequence: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub unit: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub task: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pr: Option<u64>,

    #[serde(default = "serde_json::Value::default")]
    pub payload: serde_json::Value,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl Event {
    pub fn new(event_type: impl Into<EventKind>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            sequence: None,
            unit: None,
            task: None,
            pr: None,
            payload,
            error: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_task(mut self, task: u32) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_pr(mut self, pr: u64) -> Self {
        self.pr = Some(pr);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_known_type() {
        let event = Event::new(EventKind::UnitStarted, serde_json::json!({"x": 1}))
            .with_unit("a")
            .with_task(0);
        let wire = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.event_type, EventKind::UnitStarted);
        assert_eq!(back.unit.as_deref(), Some("a"));
        assert_eq!(back.task, Some(0));
    }

    #[test]
    fn unknown_type_preserved_verbatim() {
        let json = r#"{"type":"spec.review.started","timestamp":"2026-01-01T00:00:00Z","payload":{}}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, EventKind::Other("spec.review.started".into()));
        let back = serde_json::to_string(&event).unwrap();
        assert!(back.contains("spec.review.started"));
    }

    #[test]
    fn optional_fields_omitted_when_absent() {
        let event = Event::new(EventKind::OrchStarted, serde_json::json!({}));
        let wire = serde_json::to_string(&event).unwrap();
        assert!(!wire.contains("\"unit\""));
        assert!(!wire.contains("\"task\""));
        assert!(!wire.contains("\"pr\""));
        assert!(!wire.contains("\"error\""));
    }
}

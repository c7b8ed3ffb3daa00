//! Line-delimited JSON wire form for events crossing a process boundary.

use choo_types::Event;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode one event as a single newline-terminated JSON line.
pub fn to_wire(event: &Event) -> String {
    let mut line = serde_json::to_string(event).expect("Event serialization is infallible");
    line.push('\n');
    line
}

/// Decode one wire line (with or without the trailing newline) into an
/// event.
pub fn from_wire(line: &str) -> Result<Event, WireError> {
    let trimmed = line.trim_end_matches(['\n', '\r']);
    Ok(serde_json::from_str(trimmed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use choo_types::EventKind;

    #[test]
    fn round_trip_preserves_typed_fields() {
        let event = Event::new(EventKind::UnitStarted, serde_json::json!({"k": "v"}))
            .with_unit("a")
            .with_task(2)
            .with_pr(17);

        let wire = to_wire(&event);
        assert!(wire.ends_with('\n'));

        let back = from_wire(&wire).unwrap();
        assert_eq!(back.event_type, event.event_type);
        assert_eq!(back.unit, event.unit);
        assert_eq!(back.task, event.task);
        assert_eq!(back.pr, event.pr);
        assert_eq!(back.payload, event.payload);
    }

    #[test]
    fn from_wire_rejects_malformed_json() {
        assert!(from_wire("not json").is_err());
    }
}

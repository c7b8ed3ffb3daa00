//! The unit state machine's allowed-transitions table, kept as data rather
//! than scattered `match` arms so it reads the same as the table it's
//! grounded on.

use choo_types::UnitStatus;

/// Is `from -> to` a permitted transition?
pub fn is_allowed(from: UnitStatus, to: UnitStatus) -> bool {
    use UnitStatus::*;
    matches!(
        (from, to),
        (Pending, Ready)
            | (Pending, Blocked)
            | (Ready, InProgress)
            | (Ready, Blocked)
            | (InProgress, PrOpen)
            | (InProgress, Complete)
            | (InProgress, Failed)
            | (PrOpen, InReview)
            | (PrOpen, Complete)
            | (PrOpen, Failed)
            | (InReview, PrOpen)
            | (InReview, Merging)
            | (InReview, Failed)
            | (Merging, Complete)
            | (Merging, Failed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use UnitStatus::*;

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for terminal in [Complete, Failed, Blocked] {
            for to in [
                Pending, Ready, InProgress, PrOpen, InReview, Merging, Complete, Failed, Blocked,
            ] {
                assert!(!is_allowed(terminal, to), "{terminal:?} -> {to:?} should be rejected");
            }
        }
    }

    #[test]
    fn in_review_can_revert_to_pr_open() {
        assert!(is_allowed(InReview, PrOpen));
    }

    #[test]
    fn ready_cannot_go_directly_to_complete() {
        assert!(!is_allowed(Ready, Complete));
    }

    #[test]
    fn pending_can_only_reach_ready_or_blocked() {
        assert!(is_allowed(Pending, Ready));
        assert!(is_allowed(Pending, Blocked));
        assert!(!is_allowed(Pending, InProgress));
    }
}

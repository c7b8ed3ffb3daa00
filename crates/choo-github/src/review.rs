//! Pure derivation logic for review state and check status — kept free of
//! I/O so it's covered by plain unit tests independent of any HTTP client.

use chrono::Utc;

use crate::types::{CheckRun, Comment, OverallCheckStatus, Reaction, ReviewState, ReviewStatus};

/// A "+1" reaction means approved; otherwise an "eyes" reaction means
/// in-progress; otherwise any comments mean changes requested; otherwise
/// pending. `last_activity` is the latest timestamp across all reactions
/// and comments, or now if there are none.
pub fn derive_review_status(reactions: &[Reaction], comments: &[Comment]) -> ReviewStatus {
    let state = if reactions.iter().any(|r| r.kind == "+1") {
        ReviewState::Approved
    } else if reactions.iter().any(|r| r.kind == "eyes") {
        ReviewState::InProgress
    } else if !comments.is_empty() {
        ReviewState::ChangesRequested
    } else {
        ReviewState::Pending
    };

    let last_activity = reactions
        .iter()
        .map(|r| r.created_at)
        .chain(comments.iter().map(|c| c.created_at))
        .max()
        .unwrap_or_else(Utc::now);

    ReviewStatus {
        state,
        last_activity,
        comments: comments.to_vec(),
    }
}

/// Failure if any check concluded failure, else pending if any isn't
/// completed yet, else success.
pub fn derive_check_status(checks: &[CheckRun]) -> OverallCheckStatus {
    if checks.iter().any(|c| c.completed && c.conclusion_failure) {
        OverallCheckStatus::Failure
    } else if checks.iter().any(|c| !c.completed) {
        OverallCheckStatus::Pending
    } else {
        OverallCheckStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(seconds: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn reaction(kind: &str, seconds: i64) -> Reaction {
        Reaction {
            kind: kind.to_string(),
            created_at: at(seconds),
        }
    }

    fn comment(seconds: i64) -> Comment {
        Comment {
            id: 1,
            author: "reviewer".to_string(),
            body: "please fix".to_string(),
            created_at: at(seconds),
        }
    }

    #[test]
    fn thumbs_up_wins_over_eyes_and_comments() {
        let status = derive_review_status(&[reaction("eyes", 0), reaction("+1", 10)], &[comment(5)]);
        assert_eq!(status.state, ReviewState::Approved);
        assert_eq!(status.last_activity, at(10));
    }

    #[test]
    fn eyes_without_thumbs_up_is_in_progress() {
        let status = derive_review_status(&[reaction("eyes", 0)], &[comment(5)]);
        assert_eq!(status.state, ReviewState::InProgress);
    }

    #[test]
    fn comments_without_reactions_are_changes_requested() {
        let status = derive_review_status(&[], &[comment(0)]);
        assert_eq!(status.state, ReviewState::ChangesRequested);
    }

    #[test]
    fn nothing_at_all_is_pending() {
        let before = Utc::now() - Duration::seconds(1);
        let status = derive_review_status(&[], &[]);
        assert_eq!(status.state, ReviewState::Pending);
        assert!(status.last_activity >= before);
    }

    #[test]
    fn check_status_failure_beats_pending() {
        let checks = vec![
            CheckRun { name: "a".into(), completed: true, conclusion_failure: true },
            CheckRun { name: "b".into(), completed: false, conclusion_failure: false },
        ];
        assert_eq!(derive_check_status(&checks), OverallCheckStatus::Failure);
    }

    #[test]
    fn check_status_pending_when_incomplete() {
        let checks = vec![CheckRun { name: "a".into(), completed: false, conclusion_failure: false }];
        assert_eq!(derive_check_status(&checks), OverallCheckStatus::Pending);
    }

    #[test]
    fn check_status_success_when_all_complete_and_clean() {
        let checks = vec![CheckRun { name: "a".into(), completed: true, conclusion_failure: false }];
        assert_eq!(derive_check_status(&checks), OverallCheckStatus::Success);
    }

    #[test]
    fn check_status_success_with_no_checks() {
        assert_eq!(derive_check_status(&[]), OverallCheckStatus::Success);
    }
}

//! Property-based tests for argus_reasoning.
//!
//! The heuristic tier must stay pure and bounded: whatever the input text,
//! confidence caps hold and resolved times are in the future of `now`.

use argus_reasoning::heuristics::{analyze_message, detect_action, resolve_datetime};
use argus_reasoning::{ActionKind, EventSummary};
use chrono::{FixedOffset, TimeZone};
use proptest::prelude::*;

fn reference_now() -> chrono::DateTime<FixedOffset> {
    FixedOffset::east_opt(19_800)
        .unwrap()
        .with_ymd_and_hms(2026, 8, 1, 12, 0, 0)
        .unwrap()
}

proptest! {
    /// Extraction confidence never exceeds the 0.95 heuristic cap.
    #[test]
    fn analyze_confidence_bounded(text in ".{0,200}") {
        if let Some(proposal) = analyze_message(&text, None, reference_now()) {
            prop_assert!(proposal.confidence > 0.0);
            prop_assert!(proposal.confidence <= 0.95);
            prop_assert!(!proposal.title.trim().is_empty());
        }
    }

    /// Messages under five characters never produce an event.
    #[test]
    fn analyze_rejects_tiny_messages(text in ".{0,4}") {
        prop_assert!(analyze_message(&text, None, reference_now()).is_none());
    }

    /// Relative-date resolution lands strictly after `now` (the defaults
    /// resolve same-day 10:00 only when that is still ahead; earlier wording
    /// may resolve to today but never to the past day).
    #[test]
    fn resolved_tomorrow_is_future(prefix in "[a-z ]{0,30}") {
        let now = reference_now();
        let text = format!("{prefix} tomorrow at 5pm");
        if let Some(resolved) = resolve_datetime(&text.to_lowercase(), now) {
            prop_assert!(resolved > now);
        }
    }

    /// Action detection with no candidates can never target anything.
    #[test]
    fn detect_action_no_candidates_is_none(text in ".{0,120}") {
        let decision = detect_action(&text, &[]);
        prop_assert!(decision.target_event_id.is_none());
        prop_assert_eq!(decision.action, ActionKind::None);
    }

    /// A detected action's target is always one of the supplied candidates.
    #[test]
    fn detect_action_target_from_candidates(
        text in "(done|cancel|postpone|ignore) [a-z]{2,12}",
        ids in proptest::collection::vec(1i64..100, 1..5),
    ) {
        let candidates: Vec<EventSummary> = ids
            .iter()
            .map(|id| EventSummary {
                id: *id,
                title: format!("event {id}"),
                event_type: "task".into(),
                keywords: String::new(),
            })
            .collect();
        let decision = detect_action(&text, &candidates);
        if let Some(target) = decision.target_event_id {
            prop_assert!(ids.contains(&target));
        }
    }
}

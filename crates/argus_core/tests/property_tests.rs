//! Property-based tests for argus_core.
//!
//! Uses proptest to verify invariants that must hold for ALL possible inputs,
//! not just hand-picked examples.

use argus_core::cache::ResponseCache;
use argus_core::model::{earliest_reminder_time, TRIGGER_OFFSETS_SECS};
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    /// The cache never grows past its capacity, whatever the key sequence.
    #[test]
    fn cache_never_exceeds_capacity(
        capacity in 1usize..16,
        keys in proptest::collection::vec("[a-f]{1,3}", 1..200),
    ) {
        let cache = ResponseCache::new(capacity, Duration::from_secs(60));
        for (i, key) in keys.iter().enumerate() {
            cache.put(key, serde_json::json!(i));
            prop_assert!(cache.len() <= capacity);
        }
    }

    /// A just-inserted key is always retrievable while within TTL.
    #[test]
    fn cache_read_your_writes(
        keys in proptest::collection::vec("[a-f]{1,3}", 1..100),
    ) {
        let cache = ResponseCache::new(1000, Duration::from_secs(60));
        for (i, key) in keys.iter().enumerate() {
            cache.put(key, serde_json::json!(i));
            prop_assert_eq!(cache.get(key), Some(serde_json::json!(i)));
        }
    }

    /// The derived reminder time is always one of the three offsets, always
    /// strictly in the future, and always the earliest qualifying one.
    #[test]
    fn reminder_time_is_earliest_future_offset(
        event_time in 1_000_000i64..2_000_000_000,
        delta in -200_000i64..200_000,
    ) {
        let now = event_time + delta;
        match earliest_reminder_time(event_time, now) {
            Some(t) => {
                prop_assert!(t > now);
                prop_assert!(TRIGGER_OFFSETS_SECS.contains(&(event_time - t)));
                // Nothing earlier also qualifies.
                for off in TRIGGER_OFFSETS_SECS {
                    let candidate = event_time - off;
                    if candidate > now {
                        prop_assert!(t <= candidate);
                    }
                }
            }
            None => {
                // No offset lands strictly in the future.
                for off in TRIGGER_OFFSETS_SECS {
                    prop_assert!(event_time - off <= now);
                }
            }
        }
    }

    /// Cache keys only depend on the first 500 characters of the input.
    #[test]
    fn cache_key_prefix_bounded(suffix_a in "[a-z]{1,10}", suffix_b in "[a-z]{1,10}") {
        let base = "m".repeat(500);
        let key_a = ResponseCache::key("fn", &format!("{base}{suffix_a}"));
        let key_b = ResponseCache::key("fn", &format!("{base}{suffix_b}"));
        prop_assert_eq!(key_a, key_b);
    }
}

//! Process-local retry queue for notification deliveries.
//!
//! Items retry on an absolute-timestamp schedule (60 s, 300 s, 900 s after
//! the first attempt); a dropped scheduler tick merely delays a retry by one
//! period. The third failure moves the payload to `failed-reminders.jsonl`
//! and the item disappears from the queue. Best-effort by design: the queue
//! does not survive a restart.

use argus_core::{DeadLetter, EventStatus, PushEnvelope};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const BACKOFF_SECS: [i64; 3] = [60, 300, 900];
pub const MAX_RETRIES: u32 = 3;

/// What to do once a delivery finally succeeds. Stored as data rather than a
/// closure so queue contents stay inspectable.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkAction {
    FireTrigger(i64),
    TransitionEvent { event_id: i64, to: EventStatus },
}

#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub envelope: PushEnvelope,
    pub event_id: i64,
    pub event_title: String,
    pub trigger_type: String,
    /// Completed retry attempts so far (0..MAX_RETRIES).
    pub attempt: u32,
    pub first_attempt_at: i64,
    pub next_retry_at: i64,
    pub mark: MarkAction,
    pub last_error: String,
}

/// Absolute retry time for a given attempt: first_attempt_at plus the
/// cumulative backoff.
fn retry_at(first_attempt_at: i64, attempt: u32) -> i64 {
    let cumulative: i64 = BACKOFF_SECS.iter().take(attempt as usize + 1).sum();
    first_attempt_at + cumulative
}

pub struct RetryQueue {
    items: Mutex<Vec<PendingDelivery>>,
    failed_log: DeadLetter,
    failed_count: AtomicU64,
}

impl RetryQueue {
    pub fn new(failed_log: DeadLetter) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            failed_log,
            failed_count: AtomicU64::new(0),
        }
    }

    /// Enqueue a delivery that just failed its first (inline) attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &self,
        envelope: PushEnvelope,
        event_id: i64,
        event_title: &str,
        trigger_type: &str,
        mark: MarkAction,
        error: &str,
        now: i64,
    ) {
        let item = PendingDelivery {
            envelope,
            event_id,
            event_title: event_title.to_string(),
            trigger_type: trigger_type.to_string(),
            attempt: 0,
            first_attempt_at: now,
            next_retry_at: retry_at(now, 0),
            mark,
            last_error: error.to_string(),
        };
        self.items.lock().unwrap().push(item);
    }

    /// Drain every item whose retry time has arrived. The caller re-inserts
    /// failures via `reinsert_failed`.
    pub fn due(&self, now: i64) -> Vec<PendingDelivery> {
        let mut items = self.items.lock().unwrap();
        let (due, rest): (Vec<_>, Vec<_>) =
            items.drain(..).partition(|item| item.next_retry_at <= now);
        *items = rest;
        due
    }

    /// Record another failure. Items that have exhausted their retries move
    /// to the failed-reminders log; the rest are rescheduled.
    pub fn reinsert_failed(&self, mut item: PendingDelivery, error: &str) {
        item.attempt += 1;
        item.last_error = error.to_string();
        if item.attempt >= MAX_RETRIES {
            self.failed_log.append_json(&serde_json::json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "eventId": item.event_id,
                "eventTitle": item.event_title,
                "triggerType": item.trigger_type,
                "attempts": item.attempt,
                "lastError": item.last_error,
            }));
            self.failed_count.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(
                "delivery for event {} permanently failed after {} retries",
                item.event_id,
                item.attempt
            );
            return;
        }
        item.next_retry_at = retry_at(item.first_attempt_at, item.attempt);
        self.items.lock().unwrap().push(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliveries moved to the failed-reminders log this process lifetime.
    pub fn failed_count(&self) -> u64 {
        self.failed_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::notify::kind;

    fn queue_in(dir: &tempfile::TempDir) -> RetryQueue {
        RetryQueue::new(DeadLetter::new(dir.path().join("failed-reminders.jsonl")))
    }

    fn enqueue_one(queue: &RetryQueue, now: i64) {
        queue.enqueue(
            PushEnvelope::new(kind::TRIGGER),
            7,
            "Dentist",
            "time_15m",
            MarkAction::FireTrigger(3),
            "no client connected",
            now,
        );
    }

    #[test]
    fn test_backoff_schedule_is_absolute() {
        assert_eq!(retry_at(1_000, 0), 1_060);
        assert_eq!(retry_at(1_000, 1), 1_360);
        assert_eq!(retry_at(1_000, 2), 2_260);
    }

    #[test]
    fn test_due_respects_next_retry_at() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        enqueue_one(&queue, 1_000);

        assert!(queue.due(1_059).is_empty());
        assert_eq!(queue.len(), 1);

        let due = queue.due(1_060);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempt, 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_three_failures_move_to_failed_log() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        enqueue_one(&queue, 1_000);

        // Retry 1 fails.
        let item = queue.due(1_060).pop().unwrap();
        queue.reinsert_failed(item, "still down");
        assert_eq!(queue.len(), 1);

        // Retry 2 fails.
        let item = queue.due(1_360).pop().unwrap();
        assert_eq!(item.attempt, 1);
        queue.reinsert_failed(item, "still down");

        // Retry 3 fails: moved out of the queue into the log.
        let item = queue.due(2_260).pop().unwrap();
        assert_eq!(item.attempt, 2);
        queue.reinsert_failed(item, "gave up");

        assert!(queue.is_empty());
        assert_eq!(queue.failed_count(), 1);

        let content =
            std::fs::read_to_string(dir.path().join("failed-reminders.jsonl")).unwrap();
        let record: serde_json::Value =
            serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(record["eventId"], 7);
        assert_eq!(record["eventTitle"], "Dentist");
        assert_eq!(record["triggerType"], "time_15m");
        assert_eq!(record["attempts"], 3);
        assert_eq!(record["lastError"], "gave up");
        assert!(record["timestamp"].is_string());
    }

    #[test]
    fn test_queue_items_never_reach_attempt_three() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir);
        enqueue_one(&queue, 0);
        for now in [60, 360, 1_260, 10_000] {
            for item in queue.due(now) {
                assert!(item.attempt < MAX_RETRIES);
                queue.reinsert_failed(item, "down");
            }
        }
        assert!(queue.is_empty());
    }
}

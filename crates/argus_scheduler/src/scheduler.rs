//! Periodic scans: time triggers (60 s), due reminders and retry drain
//! (30 s), snooze expiry (30 s), daily snapshot (24 h, first run +60 s).
//!
//! Mark-fired and status transitions run only after the transport accepts a
//! delivery, so a mid-retry recovery still marks exactly once. Work that has
//! entered the retry queue (or exhausted it) is remembered in-process so the
//! periodic scans do not double-deliver.

use crate::retry_queue::{MarkAction, RetryQueue};
use crate::snapshot;
use argus_core::notify::kind;
use argus_core::{EventStatus, NotificationSink, PopupType, PushEnvelope};
use argus_reasoning::{generate_popup, LlmClient, TierOrchestrator};
use argus_store::EventStore;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Triggers whose parsed time is within this many seconds of "now" fire.
const TRIGGER_LOOKAHEAD_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub trigger_scan_interval: Duration,
    pub reminder_scan_interval: Duration,
    pub snapshot_interval: Duration,
    pub snapshot_initial_delay: Duration,
    pub backups_dir: PathBuf,
    pub retention_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            trigger_scan_interval: Duration::from_secs(60),
            reminder_scan_interval: Duration::from_secs(30),
            snapshot_interval: Duration::from_secs(86_400),
            snapshot_initial_delay: Duration::from_secs(60),
            backups_dir: PathBuf::from("data/backups"),
            retention_days: 7,
        }
    }
}

pub struct Scheduler {
    store: Arc<EventStore>,
    sink: Arc<dyn NotificationSink>,
    llm: Arc<dyn LlmClient>,
    tier: Arc<TierOrchestrator>,
    queue: Arc<RetryQueue>,
    config: SchedulerConfig,
    /// Trigger IDs currently owned by the retry queue (or permanently
    /// failed); the 60 s scan skips them.
    in_flight_triggers: Mutex<HashSet<i64>>,
    /// Event IDs owned by the retry queue for reminder/snooze deliveries.
    in_flight_events: Mutex<HashSet<i64>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<EventStore>,
        sink: Arc<dyn NotificationSink>,
        llm: Arc<dyn LlmClient>,
        tier: Arc<TierOrchestrator>,
        queue: Arc<RetryQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            sink,
            llm,
            tier,
            queue,
            config,
            in_flight_triggers: Mutex::new(HashSet::new()),
            in_flight_events: Mutex::new(HashSet::new()),
        }
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    /// Spawn the four periodic tasks. Handles are returned so the binary can
    /// abort them on shutdown.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let this = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.trigger_scan_interval);
            loop {
                interval.tick().await;
                this.scan_time_triggers(argus_core::now_secs()).await;
            }
        }));

        let this = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.reminder_scan_interval);
            loop {
                interval.tick().await;
                let now = argus_core::now_secs();
                this.scan_due_reminders(now).await;
                this.drain_retries(now).await;
            }
        }));

        let this = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.reminder_scan_interval);
            loop {
                interval.tick().await;
                this.scan_snooze_expiry(argus_core::now_secs()).await;
            }
        }));

        let this = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            tokio::time::sleep(this.config.snapshot_initial_delay).await;
            let mut interval = tokio::time::interval(this.config.snapshot_interval);
            loop {
                interval.tick().await;
                this.run_snapshot().await;
            }
        }));

        handles
    }

    /// 60 s scan: fire unfired time triggers whose value is within the
    /// lookahead window. Events no longer in a deliverable status get their
    /// trigger fired without delivery (defensive path).
    pub async fn scan_time_triggers(&self, now: i64) {
        for trigger in self.store.unfired_time_triggers().await {
            if !trigger.kind.is_time_kind() {
                continue;
            }
            if self.in_flight_triggers.lock().unwrap().contains(&trigger.id) {
                continue;
            }
            let Some(fire_at) = parse_trigger_time(&trigger.value) else {
                tracing::warn!(
                    "trigger {} has unparseable value '{}', firing without delivery",
                    trigger.id,
                    trigger.value
                );
                let _ = self.store.mark_trigger_fired(trigger.id).await;
                continue;
            };
            if fire_at > now + TRIGGER_LOOKAHEAD_SECS {
                continue;
            }

            let event = self.store.get_event(trigger.event_id).await;
            let deliverable = event
                .as_ref()
                .map(|e| e.status.is_deliverable())
                .unwrap_or(false);
            if !deliverable {
                let _ = self.store.mark_trigger_fired(trigger.id).await;
                continue;
            }
            let event = event.expect("deliverable implies present");

            let popup =
                generate_popup(&self.tier, self.llm.as_ref(), &event, PopupType::EventReminder)
                    .await;
            let envelope = PushEnvelope::new(kind::TRIGGER)
                .with_event(event_json(&event))
                .with_field(
                    "triggerType",
                    serde_json::Value::String(trigger.kind.as_str().to_string()),
                )
                .with_popup(popup);

            match self.sink.send(&envelope).await {
                Ok(()) => {
                    let _ = self.store.mark_trigger_fired(trigger.id).await;
                }
                Err(e) => {
                    self.in_flight_triggers.lock().unwrap().insert(trigger.id);
                    self.queue.enqueue(
                        envelope,
                        event.id,
                        &event.title,
                        trigger.kind.as_str(),
                        MarkAction::FireTrigger(trigger.id),
                        &format!("{e:#}"),
                        now,
                    );
                }
            }
        }
    }

    /// 30 s scan: scheduled events whose reminder time has arrived become
    /// `reminded` once delivered.
    pub async fn scan_due_reminders(&self, now: i64) {
        for event in self.store.due_scheduled_events(now).await {
            if self.in_flight_events.lock().unwrap().contains(&event.id) {
                continue;
            }
            let popup =
                generate_popup(&self.tier, self.llm.as_ref(), &event, PopupType::EventReminder)
                    .await;
            let envelope = PushEnvelope::new(kind::NOTIFICATION)
                .with_event(event_json(&event))
                .with_popup(popup);

            match self.sink.send(&envelope).await {
                Ok(()) => {
                    let _ = self.store.transition_event(event.id, EventStatus::Reminded).await;
                }
                Err(e) => {
                    self.in_flight_events.lock().unwrap().insert(event.id);
                    self.queue.enqueue(
                        envelope,
                        event.id,
                        &event.title,
                        "reminder",
                        MarkAction::TransitionEvent {
                            event_id: event.id,
                            to: EventStatus::Reminded,
                        },
                        &format!("{e:#}"),
                        now,
                    );
                }
            }
        }
    }

    /// 30 s scan: expired snoozes return to `discovered`.
    pub async fn scan_snooze_expiry(&self, now: i64) {
        for event in self.store.due_snoozed_events(now).await {
            if self.in_flight_events.lock().unwrap().contains(&event.id) {
                continue;
            }
            let popup =
                generate_popup(&self.tier, self.llm.as_ref(), &event, PopupType::SnoozeReminder)
                    .await;
            let envelope = PushEnvelope::new(kind::NOTIFICATION)
                .with_event(event_json(&event))
                .with_popup(popup);

            match self.sink.send(&envelope).await {
                Ok(()) => {
                    let _ = self
                        .store
                        .transition_event(event.id, EventStatus::Discovered)
                        .await;
                }
                Err(e) => {
                    self.in_flight_events.lock().unwrap().insert(event.id);
                    self.queue.enqueue(
                        envelope,
                        event.id,
                        &event.title,
                        "snooze",
                        MarkAction::TransitionEvent {
                            event_id: event.id,
                            to: EventStatus::Discovered,
                        },
                        &format!("{e:#}"),
                        now,
                    );
                }
            }
        }
    }

    /// Retry drain, run inside the 30 s loop. The mark action runs only on
    /// success.
    pub async fn drain_retries(&self, now: i64) {
        for item in self.queue.due(now) {
            match self.sink.send(&item.envelope).await {
                Ok(()) => {
                    match &item.mark {
                        MarkAction::FireTrigger(trigger_id) => {
                            let _ = self.store.mark_trigger_fired(*trigger_id).await;
                            self.in_flight_triggers.lock().unwrap().remove(trigger_id);
                        }
                        MarkAction::TransitionEvent { event_id, to } => {
                            let _ = self.store.transition_event(*event_id, *to).await;
                            self.in_flight_events.lock().unwrap().remove(event_id);
                        }
                    }
                    tracing::info!(
                        "retried delivery for event {} succeeded on attempt {}",
                        item.event_id,
                        item.attempt + 1
                    );
                }
                Err(e) => {
                    self.queue.reinsert_failed(item, &format!("{e:#}"));
                }
            }
        }
    }

    /// Daily snapshot plus retention pruning.
    pub async fn run_snapshot(&self) {
        match snapshot::write_snapshot(&self.store, &self.config.backups_dir).await {
            Ok(path) => tracing::info!("daily snapshot written to {}", path.display()),
            Err(e) => tracing::error!("daily snapshot failed: {:#}", e),
        }
        argus_store::prune_backups(
            &self.config.backups_dir,
            self.config.retention_days,
            chrono::Local::now().date_naive(),
        );
    }
}

/// Trigger values are RFC 3339 at write time; epoch seconds appear in rows
/// restored from very old backups.
fn parse_trigger_time(value: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    value.trim().parse::<i64>().ok()
}

/// Event JSON with the embedding stripped, matching the ingest envelopes.
fn event_json(event: &argus_core::Event) -> serde_json::Value {
    let mut stripped = event.clone();
    stripped.embedding = None;
    serde_json::to_value(&stripped).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trigger_time_formats() {
        assert_eq!(
            parse_trigger_time("2026-08-02T10:00:00+00:00"),
            Some(1_785_664_800)
        );
        assert_eq!(parse_trigger_time("1785664800"), Some(1_785_664_800));
        assert_eq!(parse_trigger_time("whenever"), None);
    }
}

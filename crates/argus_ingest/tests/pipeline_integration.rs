//! End-to-end pipeline tests against an in-memory store and a scripted
//! provider: discovery, action detection, duplicate suppression, conflicts,
//! tier degradation, and the modify/confirm flow.

use argus_core::{
    DeadLetter, EventStatus, EventType, Guard, NotificationSink, PushEnvelope, ResponseCache,
    TierMode,
};
use argus_ingest::{ContextMatcher, Pipeline, WebhookPayload};
use argus_reasoning::{MockLlm, TierOrchestrator};
use argus_store::{EventStore, NewEvent};
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct RecordingSink {
    envelopes: Mutex<Vec<PushEnvelope>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            envelopes: Mutex::new(Vec::new()),
        }
    }

    fn kinds(&self) -> Vec<String> {
        self.envelopes
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.kind.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, envelope: &PushEnvelope) -> anyhow::Result<()> {
        self.envelopes.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

struct Harness {
    pipeline: Pipeline,
    store: Arc<EventStore>,
    tier: Arc<TierOrchestrator>,
    mock: Arc<MockLlm>,
    sink: Arc<RecordingSink>,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    harness_with_cooldown(Duration::from_secs(30)).await
}

async fn harness_with_cooldown(base_cooldown: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let guard = Guard::new(DeadLetter::new(dir.path().join("dead-letter.jsonl")), false);
    let store = Arc::new(EventStore::open_in_memory(guard).await.unwrap());
    let tier = Arc::new(TierOrchestrator::new(TierMode::Auto, base_cooldown));
    let mock = Arc::new(MockLlm::new());
    let cache = Arc::new(ResponseCache::default());
    let sink = Arc::new(RecordingSink::new());

    let pipeline = Pipeline::new(
        store.clone(),
        mock.clone(),
        tier.clone(),
        cache,
        sink.clone(),
        true,
        false,
    );
    Harness {
        pipeline,
        store,
        tier,
        mock,
        sink,
        _dir: dir,
    }
}

fn webhook(id: &str, text: &str, from_me: bool, ts: i64) -> WebhookPayload {
    WebhookPayload::parse(&json!({
        "event": "messages.upsert",
        "instance": "argus",
        "data": {
            "key": {"remoteJid": "919900112233@s.whatsapp.net", "fromMe": from_me, "id": id},
            "pushName": "Rahul",
            "message": {"conversation": text},
            "messageTimestamp": ts
        }
    }))
    .unwrap()
}

fn static_blueprint_json(popup_type: &str) -> String {
    format!(
        r#"{{"icon": "✨", "headerClass": "discovery", "title": "Spotted", "subtitle": "s",
            "body": "b", "buttons": [{{"text": "OK", "action": "acknowledge", "style": "primary"}}],
            "popupType": "{popup_type}"}}"#
    )
}

/// Queue the three completions one extraction pass consumes: action
/// detection ("none"), the analyzer proposals, and a popup blueprint.
fn queue_extraction(mock: &MockLlm, proposals_json: &str, popup_type: &str) {
    mock.queue_completion(r#"{"action": "none", "confidence": 0.1}"#);
    mock.queue_completion(proposals_json);
    mock.queue_completion(&static_blueprint_json(popup_type));
}

#[tokio::test]
async fn test_discovery_without_time() {
    let h = harness().await;
    queue_extraction(
        &h.mock,
        r#"{"events": [{"event_type": "recommendation",
            "title": "Try the cashews at Zantyes shop in Goa",
            "description": "Rahul's tip for the Goa trip",
            "event_time": null, "location": "Goa",
            "keywords": "cashews,zantyes,goa", "confidence": 0.85}]}"#,
        "event_discovery",
    );

    let summary = h
        .pipeline
        .process_webhook(webhook(
            "MSG1",
            "Bro you should definitely try the cashews at Zantyes shop when you go to Goa",
            false,
            1_770_500_001,
        ))
        .await;

    assert_eq!(summary.new_event_count, 1);
    let event = &summary.new_events[0].event;
    assert_eq!(event.event_type, EventType::Recommendation);
    assert_eq!(event.event_time, None);
    assert_eq!(event.context_url.as_deref(), Some("goa"));
    assert_eq!(event.sender_name.as_deref(), Some("Rahul"));
    assert_eq!(event.status, EventStatus::Discovered);
    assert_eq!(h.sink.kinds(), vec!["notification"]);

    // A later context check for a Goa travel page surfaces the event.
    let matcher = ContextMatcher::new(h.store.clone(), h.mock.clone(), h.tier.clone());
    h.mock
        .queue_completion(r#"{"relevant_indices": [0], "confidence": 0.8}"#);
    let result = matcher
        .match_context("https://www.makemytrip.com/goa-hotels", None)
        .await;
    assert!(result.matched);
    assert_eq!(result.events.len(), 1);
    assert_eq!(result.events[0].id, event.id);
}

#[tokio::test]
async fn test_own_message_subscription_lifecycle() {
    let h = harness().await;
    queue_extraction(
        &h.mock,
        r#"{"events": [{"event_type": "subscription", "title": "Cancel Netflix subscription",
            "description": "after finishing the show", "event_time": null,
            "keywords": "netflix,subscription", "confidence": 0.9}]}"#,
        "event_discovery",
    );

    let summary = h
        .pipeline
        .process_webhook(webhook(
            "MSG2",
            "I need to cancel my Netflix subscription after I finish watching this show",
            true,
            1_770_500_100,
        ))
        .await;
    assert_eq!(summary.new_event_count, 1);
    let event = &summary.new_events[0].event;
    assert_eq!(event.event_type, EventType::Subscription);
    assert_eq!(event.context_url.as_deref(), Some("netflix"));

    let matcher = ContextMatcher::new(h.store.clone(), h.mock.clone(), h.tier.clone());
    h.mock
        .queue_completion(r#"{"relevant_indices": [0], "confidence": 0.9}"#);
    let result = matcher.match_context("https://www.netflix.com/browse", None).await;
    assert!(result.matched);

    // After completion the context check no longer returns it. (Fresh
    // matcher: the first result is cached for ten minutes.)
    h.store
        .transition_event(event.id, EventStatus::Completed)
        .await
        .unwrap();
    let matcher = ContextMatcher::new(h.store.clone(), h.mock.clone(), h.tier.clone());
    h.mock
        .queue_completion(r#"{"relevant_indices": [], "confidence": 0.0}"#);
    let result = matcher.match_context("https://www.netflix.com/browse", None).await;
    assert!(!result.matched);
}

#[tokio::test]
async fn test_action_detection_completes_target() {
    let h = harness().await;
    let id = h
        .store
        .insert_event(&NewEvent {
            event_type: EventType::Subscription,
            title: "Cancel Netflix subscription".into(),
            keywords: "netflix,subscription".into(),
            confidence: 0.9,
            ..Default::default()
        })
        .await
        .unwrap();
    h.store.schedule_event(id, None).await.unwrap();

    // Provider down: the heuristic detector handles it.
    h.mock.set_unreachable(true);
    let summary = h
        .pipeline
        .process_webhook(webhook("MSG3", "already cancelled netflix", false, 1_770_500_200))
        .await;

    assert_eq!(summary.new_event_count, 0);
    let action = summary.action_performed.unwrap();
    assert_eq!(action.action, "complete");
    assert_eq!(action.event_id, id);
    assert_eq!(
        h.store.get_event(id).await.unwrap().status,
        EventStatus::Completed
    );
    assert_eq!(h.sink.kinds(), vec!["action_performed"]);
}

#[tokio::test]
async fn test_duplicate_webhook_yields_one_event() {
    let h = harness().await;
    let proposals = r#"{"events": [{"event_type": "task", "title": "Pay the electricity bill",
        "event_time": null, "keywords": "electricity,bill", "confidence": 0.8}]}"#;

    queue_extraction(&h.mock, proposals, "event_discovery");
    let first = h
        .pipeline
        .process_webhook(webhook("MSG4", "pay the electricity bill please", false, 1_770_500_300))
        .await;
    assert_eq!(first.new_event_count, 1);

    queue_extraction(&h.mock, proposals, "event_discovery");
    let second = h
        .pipeline
        .process_webhook(webhook("MSG5", "pay the electricity bill please", false, 1_770_500_301))
        .await;
    assert_eq!(second.new_event_count, 0);

    assert_eq!(h.store.active_events(10).await.len(), 1);
}

#[tokio::test]
async fn test_conflicting_events_broadcast_warning() {
    let h = harness().await;
    let time = "2026-08-10T10:00:00+05:30";

    queue_extraction(
        &h.mock,
        &format!(
            r#"{{"events": [{{"event_type": "meeting", "title": "Standup with platform team",
                "event_time": "{time}", "keywords": "standup,platform", "confidence": 0.9}}]}}"#
        ),
        "event_discovery",
    );
    let first = h
        .pipeline
        .process_webhook(webhook("MSG6", "standup with platform team moved", false, 1_770_500_400))
        .await;
    assert_eq!(first.new_events[0].conflicts.len(), 0);

    queue_extraction(
        &h.mock,
        &format!(
            r#"{{"events": [{{"event_type": "meeting", "title": "Dentist visit near office",
                "event_time": "{time}", "keywords": "dentist", "confidence": 0.9}}]}}"#
        ),
        "conflict_warning",
    );
    let second = h
        .pipeline
        .process_webhook(webhook("MSG7", "dentist visit same morning", false, 1_770_500_401))
        .await;

    let inserted = &second.new_events[0];
    assert_eq!(inserted.conflicts.len(), 1);
    assert_eq!(inserted.conflicts[0].id, first.new_events[0].event.id);
    assert_eq!(
        h.sink.kinds(),
        vec!["notification", "conflict_warning"]
    );
}

#[tokio::test]
async fn test_tier_degradation_and_recovery() {
    let h = harness_with_cooldown(Duration::from_millis(200)).await;
    h.mock.set_unreachable(true);

    let message_ts = 1_770_500_001i64;
    let summary = h
        .pipeline
        .process_webhook(webhook("MSG8", "lets meet tomorrow at 5pm", false, message_ts))
        .await;

    // One T1 failure (action detection); extraction then ran on tier 2.
    assert_eq!(h.tier.consecutive_failures(), 1);
    assert_eq!(h.tier.status().tier, 2);

    assert_eq!(summary.new_event_count, 1);
    let event = &summary.new_events[0].event;
    assert_eq!(event.event_type, EventType::Meeting);
    assert!(event.confidence <= 0.95);

    // The heuristic resolved "tomorrow at 5pm" against the message timestamp.
    let offset = *chrono::Local::now().offset();
    let message_local = chrono::DateTime::from_timestamp(message_ts, 0)
        .unwrap()
        .with_timezone(&offset);
    let expected = message_local
        .date_naive()
        .succ_opt()
        .unwrap()
        .and_hms_opt(17, 0, 0)
        .unwrap()
        .and_local_timezone(offset)
        .unwrap()
        .timestamp();
    assert_eq!(event.event_time, Some(expected));

    // Provider recovers; after the cooldown elapses any success resets T1.
    h.mock.set_unreachable(false);
    tokio::time::sleep(Duration::from_millis(500)).await;
    queue_extraction(
        &h.mock,
        r#"{"events": []}"#,
        "event_discovery",
    );
    h.pipeline
        .process_webhook(webhook("MSG9", "nothing important here really", false, message_ts + 10))
        .await;
    assert_eq!(h.tier.status().tier, 1);
    assert_eq!(h.tier.consecutive_failures(), 0);
}

#[tokio::test]
async fn test_modify_parks_until_confirmed() {
    let h = harness().await;
    let id = h
        .store
        .insert_event(&NewEvent {
            event_type: EventType::Meeting,
            title: "Dinner with Sam".into(),
            keywords: "dinner,sam".into(),
            confidence: 0.9,
            ..Default::default()
        })
        .await
        .unwrap();

    h.mock.queue_completion(r#"{"action": "none", "confidence": 0.1}"#);
    h.mock.queue_completion(&format!(
        r#"{{"events": [{{"event_type": "meeting", "title": "Dinner with Sam",
            "event_time": "2026-08-09T20:00:00+05:30", "keywords": "dinner,sam",
            "confidence": 0.9, "event_action": "modify", "target_event_id": {id}}}]}}"#
    ));
    h.mock.queue_completion(&static_blueprint_json("update_confirm"));

    let summary = h
        .pipeline
        .process_webhook(webhook("MSG10", "dinner with sam moved to 8pm saturday", false, 1_770_500_500))
        .await;

    let pending = summary.pending_action.unwrap();
    assert_eq!(pending.target_event_id, id);
    assert_eq!(summary.new_event_count, 0);
    // Not applied yet.
    assert_eq!(h.store.get_event(id).await.unwrap().event_time, None);
    assert!(h.pipeline.pending_update(id).is_some());
    assert_eq!(h.sink.kinds(), vec!["update_confirm"]);

    // Confirmation applies the parked change and broadcasts the update.
    let updated = h.pipeline.confirm_update(id).await.unwrap();
    assert!(updated.event_time.is_some());
    assert!(h.pipeline.pending_update(id).is_none());
    assert_eq!(h.sink.kinds(), vec!["update_confirm", "event_updated"]);
}

#[tokio::test]
async fn test_skip_rules() {
    let h = harness().await;

    // Non-upsert events are acknowledged and skipped.
    let payload = WebhookPayload::parse(&json!({
        "event": "connection.update",
        "data": {"key": {"remoteJid": "x@s.whatsapp.net", "id": "E1"}}
    }))
    .unwrap();
    assert!(h.pipeline.process_webhook(payload).await.skipped.is_some());

    // Quick filter drops greetings without any AI call.
    let summary = h
        .pipeline
        .process_webhook(webhook("MSG11", "good morning", false, 1))
        .await;
    assert_eq!(summary.skipped.as_deref(), Some("quick filter"));
    assert_eq!(h.mock.completion_calls(), 0);
}

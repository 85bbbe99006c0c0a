//! The ingestion state machine: webhook → skip rules → persistence → quick
//! filter → action detection → extraction → dedup → embed → insert →
//! conflicts → popup → broadcast.
//!
//! Store failures are dead-lettered per operation and the pipeline moves on;
//! LLM failures degrade through the tier orchestrator. Nothing in here
//! throws upstream.

use crate::dedup;
use crate::webhook::WebhookPayload;
use argus_core::notify::kind;
use argus_core::{
    Event, EventStatus, EventType, NotificationSink, PopupType, PushEnvelope, ResponseCache,
    StoredMessage, TriggerKind,
};
use argus_reasoning::{
    heuristics, ops, ActionDecision, ActionKind, EventSummary, LlmClient, TierOrchestrator,
};
use argus_store::{EventStore, NewEvent};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Minimum confidence before a detected action is applied.
const ACTION_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// How many candidate events action detection sees.
const ACTION_CANDIDATE_LIMIT: i64 = 20;

/// Context window handed to the extractor.
const CHAT_CONTEXT_MESSAGES: i64 = 5;

/// Non-service names that still make useful context anchors.
const KNOWN_PLACES: [&str; 8] = [
    "goa", "mumbai", "delhi", "bangalore", "pune", "jaipur", "manali", "airport",
];

#[derive(Debug, Clone, Serialize)]
pub struct InsertedEvent {
    pub event: Event,
    pub conflicts: Vec<argus_core::ConflictRef>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub action: String,
    pub event_id: i64,
    pub event_title: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRecord {
    pub action: String,
    pub target_event_id: i64,
    pub changes: serde_json::Value,
}

/// Classified result of one ingestion call.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    pub new_event_count: usize,
    pub new_events: Vec<InsertedEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_performed: Option<ActionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingRecord>,
}

impl IngestSummary {
    fn skipped(reason: &str) -> Self {
        Self {
            skipped: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

pub struct Pipeline {
    store: Arc<EventStore>,
    llm: Arc<dyn LlmClient>,
    tier: Arc<TierOrchestrator>,
    cache: Arc<ResponseCache>,
    sink: Arc<dyn NotificationSink>,
    process_own_messages: bool,
    skip_group_messages: bool,
    /// Proposed modifications parked until the client confirms them.
    pending_updates: Mutex<HashMap<i64, serde_json::Value>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<EventStore>,
        llm: Arc<dyn LlmClient>,
        tier: Arc<TierOrchestrator>,
        cache: Arc<ResponseCache>,
        sink: Arc<dyn NotificationSink>,
        process_own_messages: bool,
        skip_group_messages: bool,
    ) -> Self {
        Self {
            store,
            llm,
            tier,
            cache,
            sink,
            process_own_messages,
            skip_group_messages,
            pending_updates: Mutex::new(HashMap::new()),
        }
    }

    pub async fn process_webhook(&self, payload: WebhookPayload) -> IngestSummary {
        if !payload.is_message_upsert() {
            return IngestSummary::skipped("not a message event");
        }
        let Some(text) = payload.text().map(String::from) else {
            return IngestSummary::skipped("empty message");
        };
        if payload.data.key.from_me && !self.process_own_messages {
            return IngestSummary::skipped("own message");
        }
        if payload.is_group() && self.skip_group_messages {
            return IngestSummary::skipped("group message");
        }

        let now = argus_core::now_secs();
        let message_ts = payload.data.message_timestamp.unwrap_or(now);
        let chat_id = payload.data.key.remote_jid.clone();
        let sender = if payload.data.key.from_me {
            "me".to_string()
        } else {
            chat_id.clone()
        };

        let _ = self
            .store
            .upsert_message(&StoredMessage {
                id: payload.data.key.id.clone(),
                chat_id: chat_id.clone(),
                sender,
                content: text.clone(),
                timestamp: message_ts,
                ingested_at: now,
            })
            .await;
        let _ = self
            .store
            .upsert_contact(&chat_id, payload.data.push_name.as_deref(), message_ts)
            .await;

        if heuristics::is_noise(&text) {
            return IngestSummary::skipped("quick filter");
        }

        let candidates = self.store.keyword_candidates(&text, ACTION_CANDIDATE_LIMIT).await;
        let summaries: Vec<EventSummary> = candidates.iter().map(EventSummary::from_event).collect();

        let action = self.detect_action(&text, &summaries).await;
        if action.is_actionable() && action.confidence >= ACTION_CONFIDENCE_THRESHOLD {
            return self.apply_action(&action).await;
        }

        self.extract_events(&payload, &text, message_ts, &summaries).await
    }

    async fn detect_action(&self, text: &str, candidates: &[EventSummary]) -> ActionDecision {
        let cache_key = ResponseCache::key("detect_action", text);
        let cached: Option<ActionDecision> = self
            .cache
            .get(&cache_key)
            .and_then(|v| serde_json::from_value(v).ok());

        let t1 = async {
            let decision = ops::detect_action_llm(self.llm.as_ref(), text, candidates).await?;
            if let Ok(value) = serde_json::to_value(&decision) {
                self.cache.put(&cache_key, value);
            }
            Ok(decision)
        };
        let t2 = async { Ok(heuristics::detect_action(text, candidates)) };

        self.tier
            .with_fallback(
                "detect_action",
                t1,
                t2,
                cached.unwrap_or_else(ActionDecision::none),
            )
            .await
    }

    async fn apply_action(&self, action: &ActionDecision) -> IngestSummary {
        let target_id = action.target_event_id.unwrap_or(-1);
        let Some(target) = self.store.get_event(target_id).await else {
            return IngestSummary::skipped("action target not found");
        };

        let mut summary = IngestSummary::default();
        let now = argus_core::now_secs();

        let applied = match action.action {
            ActionKind::Complete => {
                self.store
                    .transition_event(target_id, EventStatus::Completed)
                    .await
                    .unwrap_or(false)
            }
            // Cancel expires rather than deletes; expired is terminal.
            ActionKind::Cancel => {
                self.store
                    .transition_event(target_id, EventStatus::Expired)
                    .await
                    .unwrap_or(false)
            }
            ActionKind::Ignore => {
                self.store
                    .transition_event(target_id, EventStatus::Ignored)
                    .await
                    .unwrap_or(false)
            }
            ActionKind::Postpone => {
                self.store
                    .snooze_event(target_id, now + action.snooze_minutes * 60)
                    .await
                    .unwrap_or(false)
            }
            ActionKind::Modify => {
                let changes = action.changes.clone().unwrap_or(serde_json::Value::Null);
                self.park_update(target_id, changes.clone());
                let popup = argus_reasoning::generate_popup(
                    &self.tier,
                    self.llm.as_ref(),
                    &target,
                    PopupType::UpdateConfirm,
                )
                .await;
                self.broadcast(
                    PushEnvelope::new(kind::UPDATE_CONFIRM)
                        .with_event(event_json(&target))
                        .with_field("changes", changes.clone())
                        .with_popup(popup),
                )
                .await;
                summary.pending_action = Some(PendingRecord {
                    action: "modify".to_string(),
                    target_event_id: target_id,
                    changes,
                });
                return summary;
            }
            ActionKind::None => false,
        };

        if applied {
            let updated = self.store.get_event(target_id).await.unwrap_or(target);
            self.broadcast(
                PushEnvelope::new(kind::ACTION_PERFORMED)
                    .with_event(event_json(&updated))
                    .with_field(
                        "action",
                        serde_json::Value::String(action.action.as_str().to_string()),
                    ),
            )
            .await;
            summary.action_performed = Some(ActionRecord {
                action: action.action.as_str().to_string(),
                event_id: updated.id,
                event_title: updated.title,
            });
        } else {
            summary.skipped = Some("action not applicable".to_string());
        }
        summary
    }

    async fn extract_events(
        &self,
        payload: &WebhookPayload,
        text: &str,
        message_ts: i64,
        candidates: &[EventSummary],
    ) -> IngestSummary {
        let offset = *chrono::Local::now().offset();
        let now_fixed = chrono::DateTime::from_timestamp(message_ts, 0)
            .map(|dt| dt.with_timezone(&offset))
            .unwrap_or_else(|| chrono::Local::now().fixed_offset());
        let sender_name = payload.data.push_name.clone();
        let context = self
            .store
            .recent_chat_messages(&payload.data.key.remote_jid, CHAT_CONTEXT_MESSAGES)
            .await;

        let cache_key = ResponseCache::key("analyze", text);
        let cached: Vec<argus_reasoning::EventProposal> = self
            .cache
            .get(&cache_key)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let t1 = async {
            let proposals = ops::analyze_llm(
                self.llm.as_ref(),
                text,
                sender_name.as_deref(),
                &context,
                candidates,
                now_fixed,
            )
            .await?;
            if let Ok(value) = serde_json::to_value(&proposals) {
                self.cache.put(&cache_key, value);
            }
            Ok(proposals)
        };
        let t2 = async {
            Ok(heuristics::analyze_message(text, sender_name.as_deref(), now_fixed)
                .into_iter()
                .collect::<Vec<_>>())
        };

        let proposals = self.tier.with_fallback("analyze", t1, t2, cached).await;

        let mut summary = IngestSummary::default();

        for proposal in proposals {
            if proposal.is_modify() {
                let target_id = proposal.target_event_id.unwrap_or(-1);
                let Some(target) = self.store.get_event(target_id).await else {
                    continue;
                };
                let changes = proposal_patch(&proposal, offset);
                self.park_update(target_id, changes.clone());
                let popup = argus_reasoning::generate_popup(
                    &self.tier,
                    self.llm.as_ref(),
                    &target,
                    PopupType::UpdateConfirm,
                )
                .await;
                self.broadcast(
                    PushEnvelope::new(kind::UPDATE_CONFIRM)
                        .with_event(event_json(&target))
                        .with_field("changes", changes.clone())
                        .with_popup(popup),
                )
                .await;
                summary.pending_action = Some(PendingRecord {
                    action: "modify".to_string(),
                    target_event_id: target_id,
                    changes,
                });
                return summary;
            }

            let recent = self.store.recent_active_events(argus_core::now_secs()).await;
            if let Some(existing) = dedup::find_duplicate(&proposal.title, &recent) {
                tracing::debug!(
                    "skipping duplicate of event {}: '{}'",
                    existing.id,
                    proposal.title
                );
                continue;
            }

            let keywords = proposal.keywords_string();
            let location = proposal.location.clone();
            let context_url = derive_context_url(&keywords, location.as_deref());

            let semantic_text = format!(
                "{} {} {} {}",
                proposal.title,
                proposal.description.as_deref().unwrap_or(""),
                keywords,
                location.as_deref().unwrap_or("")
            );
            let embedding = match self.llm.embed(&semantic_text).await {
                Ok(vector) if vector.len() == self.store.embed_dim() => Some(vector),
                Ok(vector) => {
                    tracing::warn!(
                        "provider returned a {}-dim embedding, expected {}; storing without",
                        vector.len(),
                        self.store.embed_dim()
                    );
                    None
                }
                Err(e) => {
                    tracing::debug!("embedding failed at ingest, backfill will retry: {:#}", e);
                    None
                }
            };

            let new_event = NewEvent {
                message_id: Some(payload.data.key.id.clone()),
                event_type: EventType::parse_str(&proposal.event_type),
                title: proposal.title.clone(),
                description: proposal.description.clone(),
                location,
                keywords,
                participants: proposal.participants_string(),
                event_time: proposal.resolve_event_time(offset),
                embedding,
                context_url: context_url.clone(),
                sender_name: sender_name.clone(),
                confidence: proposal.confidence,
            };

            let id = self.store.insert_event(&new_event).await.unwrap_or(-1);
            if id < 0 {
                continue;
            }
            if let Some(pattern) = &context_url {
                let _ = self.store.insert_trigger(id, TriggerKind::Url, pattern).await;
            }

            let Some(mut event) = self.store.get_event(id).await else {
                continue;
            };
            event.embedding = None;

            let conflicts: Vec<argus_core::ConflictRef> = match event.event_time {
                Some(t) => self
                    .store
                    .find_conflicts(t, Some(id))
                    .await
                    .iter()
                    .map(|e| e.conflict_ref())
                    .collect(),
                None => Vec::new(),
            };

            let popup_type = if conflicts.is_empty() {
                PopupType::EventDiscovery
            } else {
                PopupType::ConflictWarning
            };
            let popup = argus_reasoning::generate_popup(
                &self.tier,
                self.llm.as_ref(),
                &event,
                popup_type,
            )
            .await;

            let envelope_kind = if conflicts.is_empty() {
                kind::NOTIFICATION
            } else {
                kind::CONFLICT_WARNING
            };
            let mut envelope = PushEnvelope::new(envelope_kind)
                .with_event(event_json(&event))
                .with_popup(popup);
            if !conflicts.is_empty() {
                envelope = envelope.with_field(
                    "conflicts",
                    serde_json::to_value(&conflicts).unwrap_or_default(),
                );
            }
            self.broadcast(envelope).await;

            summary.new_events.push(InsertedEvent { event, conflicts });
        }

        summary.new_event_count = summary.new_events.len();
        summary
    }

    /// Apply a parked modification. Only the confirm-update endpoint calls
    /// this; proposals are never applied in place.
    pub async fn confirm_update(&self, event_id: i64) -> Option<Event> {
        let changes = self.pending_updates.lock().unwrap().remove(&event_id)?;
        let patch = changes.as_object()?.clone();
        let applied = self
            .store
            .update_event_fields(event_id, &patch)
            .await
            .unwrap_or(false);
        if !applied {
            return None;
        }
        let event = self.store.get_event(event_id).await?;
        self.broadcast(PushEnvelope::new(kind::EVENT_UPDATED).with_event(event_json(&event)))
            .await;
        Some(event)
    }

    pub fn pending_update(&self, event_id: i64) -> Option<serde_json::Value> {
        self.pending_updates.lock().unwrap().get(&event_id).cloned()
    }

    fn park_update(&self, event_id: i64, changes: serde_json::Value) {
        self.pending_updates.lock().unwrap().insert(event_id, changes);
    }

    async fn broadcast(&self, envelope: PushEnvelope) {
        if let Err(e) = self.sink.send(&envelope).await {
            tracing::debug!("broadcast of {} dropped: {:#}", envelope.kind, e);
        }
    }
}

/// Event JSON for envelopes and HTTP responses (embedding omitted).
pub fn event_json(event: &Event) -> serde_json::Value {
    let mut stripped = event.clone();
    stripped.embedding = None;
    serde_json::to_value(&stripped).unwrap_or_default()
}

/// Context anchor: the first keyword on the known service/place list, else
/// the lowercased location, else nothing.
pub fn derive_context_url(keywords: &str, location: Option<&str>) -> Option<String> {
    for keyword in keywords.split(',') {
        let k = keyword.trim().to_lowercase();
        if k.is_empty() {
            continue;
        }
        if heuristics::KNOWN_SERVICES.contains(&k.as_str()) || KNOWN_PLACES.contains(&k.as_str()) {
            return Some(k);
        }
    }
    location
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
}

/// Field patch derived from a modify proposal.
fn proposal_patch(
    proposal: &argus_reasoning::EventProposal,
    offset: chrono::FixedOffset,
) -> serde_json::Value {
    let mut patch = serde_json::Map::new();
    if !proposal.title.trim().is_empty() {
        patch.insert("title".into(), serde_json::Value::String(proposal.title.clone()));
    }
    if let Some(desc) = &proposal.description {
        patch.insert("description".into(), serde_json::Value::String(desc.clone()));
    }
    if let Some(loc) = &proposal.location {
        patch.insert("location".into(), serde_json::Value::String(loc.clone()));
    }
    if let Some(ts) = proposal.resolve_event_time(offset) {
        patch.insert("event_time".into(), serde_json::Value::Number(ts.into()));
    }
    let keywords = proposal.keywords_string();
    if !keywords.is_empty() {
        patch.insert("keywords".into(), serde_json::Value::String(keywords));
    }
    serde_json::Value::Object(patch)
}

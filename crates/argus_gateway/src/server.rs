//! The HTTP + WebSocket surface. Handlers stay thin: parse, call into the
//! service container, shape the response. Deadlines: webhook 45 s (then 202
//! with the pipeline detached), chat 30 s (graceful 200), context-check 15 s.

use crate::broadcast::Broadcaster;
use crate::types::*;
use argus_core::notify::kind;
use argus_core::{
    earliest_reminder_time, future_trigger_times, ArgusConfig, EventStatus, NotificationSink,
    PushEnvelope, ResponseCache,
};
use argus_ingest::{event_json, ContextMatcher, Pipeline, WebhookPayload};
use argus_reasoning::{heuristics, ops, LlmClient, TierOrchestrator};
use argus_scheduler::RetryQueue;
use argus_store::{EventStore, ImportMode};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const WEBHOOK_DEADLINE: Duration = Duration::from_secs(45);
const CHAT_DEADLINE: Duration = Duration::from_secs(30);
const CONTEXT_CHECK_DEADLINE: Duration = Duration::from_secs(15);
const IMPORT_BODY_LIMIT: usize = 50 * 1024 * 1024;

/// How long a context dismissal suppresses a reminder.
const DISMISSAL_SECS: i64 = 30 * 60;

/// The service container. Built once at startup and handed by reference into
/// every handler; tests construct a fresh one per test.
pub struct Services {
    pub config: ArgusConfig,
    pub store: Arc<EventStore>,
    pub llm: Arc<dyn LlmClient>,
    pub tier: Arc<TierOrchestrator>,
    pub cache: Arc<ResponseCache>,
    pub broadcaster: Arc<Broadcaster>,
    pub pipeline: Arc<Pipeline>,
    pub matcher: Arc<ContextMatcher>,
    pub queue: Arc<RetryQueue>,
}

type AppState = Arc<Services>;

pub fn router(services: AppState) -> Router {
    Router::new()
        .route("/api/webhook", post(webhook))
        .route("/api/webhook/*rest", post(webhook))
        .route("/api/context-check", post(context_check))
        .route("/api/chat", post(chat))
        .route("/api/form-check", post(form_check))
        .route("/api/events", get(list_events))
        .route(
            "/api/events/:id",
            get(get_event).patch(patch_event).delete(delete_event),
        )
        .route("/api/events/:id/complete", post(complete_event))
        .route("/api/events/:id/set-reminder", post(set_reminder))
        .route("/api/events/:id/snooze", post(snooze_event))
        .route("/api/events/:id/ignore", post(ignore_event))
        .route("/api/events/:id/dismiss", post(dismiss_event))
        .route("/api/events/:id/acknowledge", post(acknowledge_event))
        .route("/api/events/:id/confirm-update", post(confirm_update))
        .route("/api/events/:id/context-url", post(set_context_url))
        .route("/api/events/day/:ts", get(events_for_day))
        .route("/api/events/status/:status", get(events_by_status))
        .route("/api/stats", get(stats))
        .route("/api/health", get(health))
        .route("/api/ai-status", get(ai_status))
        .route("/api/backup/export", get(backup_export))
        .route("/api/backup/list", get(backup_list))
        .route(
            "/api/backup/import",
            post(backup_import).layer(DefaultBodyLimit::max(IMPORT_BODY_LIMIT)),
        )
        .route("/api/backup/restore/:filename", post(backup_restore))
        .route("/ws", get(ws_upgrade))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(services)
}

/// Serve the router until the process is asked to stop.
pub async fn serve(services: AppState) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        services.config.server.host, services.config.server.port
    );
    let app = router(services);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("argus listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

// ============================================================================
// Ingestion + AI surface
// ============================================================================

async fn webhook(State(services): State<AppState>, Json(body): Json<Value>) -> Response {
    let payload = match WebhookPayload::parse(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("{e:#}")})),
            )
                .into_response();
        }
    };
    if !payload.is_message_upsert() {
        return Json(json!({"skipped": true})).into_response();
    }

    // The pipeline runs detached so a deadline only abandons the response,
    // never the work; the client sees late events over the duplex channel.
    let pipeline = services.pipeline.clone();
    let task = tokio::spawn(async move { pipeline.process_webhook(payload).await });

    match tokio::time::timeout(WEBHOOK_DEADLINE, task).await {
        Ok(Ok(summary)) => Json(serde_json::to_value(summary).unwrap_or_default()).into_response(),
        Ok(Err(e)) => {
            tracing::error!("pipeline task panicked: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "ingestion failed"})),
            )
                .into_response()
        }
        Err(_) => (StatusCode::ACCEPTED, Json(json!({"accepted": true}))).into_response(),
    }
}

async fn context_check(
    State(services): State<AppState>,
    Json(body): Json<ContextCheckRequest>,
) -> Json<ContextCheckResponse> {
    let url = body.url.clone();
    let work = async move {
        let result = services
            .matcher
            .match_context(&body.url, body.title.as_deref())
            .await;
        if let Some(first) = result.events.first() {
            // The service worker shows the popup; the HTTP response carries
            // the same events for the extension's own bookkeeping.
            let popup = argus_reasoning::generate_popup(
                &services.tier,
                services.llm.as_ref(),
                first,
                argus_core::PopupType::ContextReminder,
            )
            .await;
            push(
                &services,
                PushEnvelope::new(kind::CONTEXT_REMINDER)
                    .with_event(event_json(first))
                    .with_popup(popup),
            )
            .await;
        }
        let events: Vec<Value> = result.events.iter().map(event_json).collect();
        ContextCheckResponse {
            matched: result.matched,
            confidence: result.confidence,
            context_triggers: events.clone(),
            context_triggers_count: events.len(),
            events,
        }
    };
    match tokio::time::timeout(CONTEXT_CHECK_DEADLINE, work).await {
        Ok(response) => Json(response),
        Err(_) => {
            tracing::warn!("context-check deadline exceeded for {}", url);
            Json(ContextCheckResponse::empty())
        }
    }
}

async fn chat(State(services): State<AppState>, Json(body): Json<ChatRequest>) -> Json<ChatResponse> {
    let work = async move {
        let query_vec = services.llm.embed(&body.query).await.ok();
        let matched = services
            .store
            .hybrid_search_events(&body.query, query_vec.as_deref(), 10)
            .await;
        let active = services.store.active_events(50).await;
        let corpus = if matched.is_empty() { &active } else { &matched };

        let history: Vec<(String, String)> = body
            .history
            .unwrap_or_default()
            .into_iter()
            .map(|turn| (turn.role, turn.content))
            .collect();
        let now = chrono::Local::now().fixed_offset();

        let response = services
            .tier
            .with_fallback(
                "chat",
                ops::chat_llm(services.llm.as_ref(), &body.query, &history, corpus),
                async { Ok(heuristics::chat_answer(&body.query, &active, now).0) },
                "I'm having trouble reaching my brain right now — try again in a minute."
                    .to_string(),
            )
            .await;

        ChatResponse {
            response,
            events: matched.iter().map(event_json).collect(),
        }
    };
    match tokio::time::timeout(CHAT_DEADLINE, work).await {
        Ok(response) => Json(response),
        Err(_) => Json(ChatResponse {
            response: "That took longer than it should have. Give me a moment and ask again."
                .to_string(),
            events: Vec::new(),
        }),
    }
}

async fn form_check(
    State(services): State<AppState>,
    Json(body): Json<FormCheckRequest>,
) -> Json<Value> {
    let query = format!("{} {}", body.field_type, body.field_value);
    let candidates = services.store.hybrid_search_events(&query, None, 5).await;

    let parsed_ts = body.parsed.as_ref().and_then(|v| v.as_i64());
    let is_temporal = matches!(body.field_type.as_str(), "date" | "datetime" | "time");

    if let (Some(parsed), true) = (parsed_ts, is_temporal) {
        if let Some(event) = candidates.iter().find(|e| e.event_time.is_some()) {
            let remembered = event.event_time.unwrap_or_default();
            if (remembered - parsed).abs() > 3_600 {
                let remembered_str = chrono::DateTime::from_timestamp(remembered, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default();
                return Json(json!({
                    "mismatch": true,
                    "entered": body.field_value,
                    "remembered": remembered_str,
                    "suggestion": format!(
                        "You saved '{}' for {} — double-check before submitting.",
                        event.title, remembered_str
                    ),
                }));
            }
        }
    }
    Json(json!({"mismatch": false}))
}

// ============================================================================
// Event CRUD + transitions
// ============================================================================

async fn list_events(
    State(services): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        Some(raw) => match EventStatus::parse_str(raw) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("unknown status '{raw}'")})),
                )
                    .into_response();
            }
        },
        None => None,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);
    let events = services.store.list_events(status, limit, offset).await;
    Json(json!({
        "events": events.iter().map(event_json).collect::<Vec<_>>(),
        "count": events.len(),
    }))
    .into_response()
}

async fn get_event(State(services): State<AppState>, Path(id): Path<i64>) -> Response {
    match services.store.get_event(id).await {
        Some(event) => Json(event_json(&event)).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "event not found"}))).into_response(),
    }
}

async fn patch_event(
    State(services): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    let Some(patch) = body.as_object() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "patch body must be an object"})),
        )
            .into_response();
    };
    if !services.store.update_event_fields(id, patch).await.unwrap_or(false) {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "event not found"}))).into_response();
    }
    let Some(event) = services.store.get_event(id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "event not found"}))).into_response();
    };
    push(&services, PushEnvelope::new(kind::EVENT_UPDATED).with_event(event_json(&event))).await;
    Json(event_json(&event)).into_response()
}

async fn delete_event(State(services): State<AppState>, Path(id): Path<i64>) -> Response {
    let Some(event) = services.store.get_event(id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "event not found"}))).into_response();
    };
    if !services.store.delete_event(id).await.unwrap_or(false) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "delete failed"})),
        )
            .into_response();
    }
    push(&services, PushEnvelope::new(kind::EVENT_DELETED).with_event(event_json(&event))).await;
    Json(json!({"success": true})).into_response()
}

async fn transition(
    services: &AppState,
    id: i64,
    to: EventStatus,
    envelope_kind: &str,
) -> Response {
    if services.store.get_event(id).await.is_none() {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "event not found"}))).into_response();
    }
    if !services.store.transition_event(id, to).await.unwrap_or(false) {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": format!("cannot move event to {}", to.as_str())})),
        )
            .into_response();
    }
    let event = services.store.get_event(id).await;
    if let Some(event) = &event {
        push(services, PushEnvelope::new(envelope_kind).with_event(event_json(event))).await;
    }
    Json(json!({"success": true, "event": event.as_ref().map(event_json)})).into_response()
}

async fn complete_event(State(services): State<AppState>, Path(id): Path<i64>) -> Response {
    transition(&services, id, EventStatus::Completed, kind::EVENT_COMPLETED).await
}

async fn ignore_event(State(services): State<AppState>, Path(id): Path<i64>) -> Response {
    transition(&services, id, EventStatus::Ignored, kind::EVENT_IGNORED).await
}

async fn set_reminder(
    State(services): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<SetReminderRequest>>,
) -> Response {
    let Some(event) = services.store.get_event(id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "event not found"}))).into_response();
    };
    let requested = body.and_then(|Json(b)| b.event_time);
    let event_time = requested.or(event.event_time);
    let now = argus_core::now_secs();

    if let Some(t) = requested {
        if event.event_time != Some(t) {
            let mut patch = serde_json::Map::new();
            patch.insert("event_time".into(), json!(t));
            let _ = services.store.update_event_fields(id, &patch).await;
        }
    }

    let mut reminder_time = None;
    if let Some(t) = event_time {
        for (trigger_kind, fire_at) in future_trigger_times(t, now) {
            let value = chrono::DateTime::from_timestamp(fire_at, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default();
            let _ = services.store.insert_trigger(id, trigger_kind, &value).await;
        }
        reminder_time = earliest_reminder_time(t, now);
    }

    if !services.store.schedule_event(id, reminder_time).await.unwrap_or(false) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "scheduling failed"})),
        )
            .into_response();
    }
    let event = services.store.get_event(id).await;
    if let Some(event) = &event {
        push(&services, PushEnvelope::new(kind::EVENT_SCHEDULED).with_event(event_json(event)))
            .await;
    }
    Json(json!({"success": true, "event": event.as_ref().map(event_json)})).into_response()
}

async fn snooze_event(
    State(services): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<SnoozeParams>,
) -> Response {
    let Some(event) = services.store.get_event(id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "event not found"}))).into_response();
    };
    // Re-snoozing an already-snoozed event just moves the wake-up time.
    if event.status != EventStatus::Snoozed && !event.status.can_transition(EventStatus::Snoozed) {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": format!("cannot snooze a {} event", event.status.as_str())})),
        )
            .into_response();
    }
    let minutes = params.minutes.unwrap_or(30).max(1);
    let until = argus_core::now_secs() + minutes * 60;
    if !services.store.snooze_event(id, until).await.unwrap_or(false) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "snooze failed"})),
        )
            .into_response();
    }
    let event = services.store.get_event(id).await;
    if let Some(event) = &event {
        push(&services, PushEnvelope::new(kind::EVENT_SNOOZED).with_event(event_json(event))).await;
    }
    Json(json!({"success": true, "event": event.as_ref().map(event_json)})).into_response()
}

async fn dismiss_event(
    State(services): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<DismissRequest>>,
) -> Response {
    let Some(event) = services.store.get_event(id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "event not found"}))).into_response();
    };
    let _ = services.store.increment_dismiss(id).await;

    if let Some(Json(body)) = body {
        if let Some(url) = body.url {
            // Prefer the event's own context anchor as the suppression
            // pattern; it matches future visits to the same site.
            let pattern = event
                .context_url
                .clone()
                .unwrap_or_else(|| url.to_lowercase());
            let until = argus_core::now_secs() + DISMISSAL_SECS;
            let _ = services.store.add_context_dismissal(id, &pattern, until).await;
        }
    }

    let event = services.store.get_event(id).await;
    if let Some(event) = &event {
        push(&services, PushEnvelope::new(kind::EVENT_DISMISSED).with_event(event_json(event)))
            .await;
    }
    Json(json!({"success": true})).into_response()
}

async fn acknowledge_event(State(services): State<AppState>, Path(id): Path<i64>) -> Response {
    let Some(event) = services.store.get_event(id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "event not found"}))).into_response();
    };
    push(
        &services,
        PushEnvelope::new(kind::EVENT_ACKNOWLEDGED).with_event(event_json(&event)),
    )
    .await;
    Json(json!({"success": true})).into_response()
}

async fn confirm_update(State(services): State<AppState>, Path(id): Path<i64>) -> Response {
    match services.pipeline.confirm_update(id).await {
        Some(event) => Json(json!({"success": true, "event": event_json(&event)})).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "no pending update for this event"})),
        )
            .into_response(),
    }
}

async fn set_context_url(
    State(services): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ContextUrlRequest>,
) -> Response {
    if !services
        .store
        .set_context_url(id, &body.context_url)
        .await
        .unwrap_or(false)
    {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "event not found"}))).into_response();
    }
    Json(json!({"success": true})).into_response()
}

async fn events_for_day(State(services): State<AppState>, Path(ts): Path<i64>) -> Json<Value> {
    let events = services.store.events_for_day(ts).await;
    Json(json!({
        "events": events.iter().map(event_json).collect::<Vec<_>>(),
        "count": events.len(),
    }))
}

async fn events_by_status(
    State(services): State<AppState>,
    Path(status): Path<String>,
) -> Response {
    let Some(status) = EventStatus::parse_str(&status) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown status '{status}'")})),
        )
            .into_response();
    };
    let events = services.store.list_events(Some(status), 200, 0).await;
    Json(json!({
        "events": events.iter().map(event_json).collect::<Vec<_>>(),
        "count": events.len(),
    }))
    .into_response()
}

// ============================================================================
// Introspection
// ============================================================================

async fn stats(State(services): State<AppState>) -> Json<Value> {
    let counts = services.store.status_counts().await;
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    let mut by_status = serde_json::Map::new();
    for (status, count) in counts {
        by_status.insert(status, json!(count));
    }
    Json(json!({"total": total, "byStatus": by_status}))
}

async fn health(State(services): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "aiTier": services.tier.status().tier,
        "scheduler": {
            "retryQueueSize": services.queue.len(),
            "failedReminderCount": services.queue.failed_count(),
        },
        "matchCache": services.matcher.cache_stats(),
        "clientConnected": services.broadcaster.is_connected(),
    }))
}

async fn ai_status(State(services): State<AppState>) -> Json<Value> {
    Json(json!({
        "tier": services.tier.status(),
        "cache": services.cache.stats(),
    }))
}

// ============================================================================
// Backup surface
// ============================================================================

async fn backup_export(State(services): State<AppState>) -> Response {
    let mut buffer = Vec::new();
    if let Err(e) = services.store.export_to_writer(&mut buffer, "http-export").await {
        tracing::error!("backup export failed: {:#}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "export failed"})),
        )
            .into_response();
    }
    let filename = argus_store::backup_filename(chrono::Local::now().date_naive());
    (
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        buffer,
    )
        .into_response()
}

async fn backup_list(State(services): State<AppState>) -> Json<Value> {
    let backups = argus_store::list_backups(&services.config.data.backups_dir());
    Json(json!({"backups": backups, "count": backups.len()}))
}

async fn backup_import(
    State(services): State<AppState>,
    Json(body): Json<ImportRequest>,
) -> Response {
    let Some(mode) = ImportMode::parse_str(&body.mode) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "mode must be 'merge' or 'replace'"})),
        )
            .into_response();
    };
    match services
        .store
        .import_backup(&body.backup, mode, body.indices.as_deref())
        .await
    {
        Ok(summary) => Json(serde_json::to_value(summary).unwrap_or_default()).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("{e:#}")})),
        )
            .into_response(),
    }
}

async fn backup_restore(
    State(services): State<AppState>,
    Path(filename): Path<String>,
) -> Response {
    let doc = match argus_store::read_backup_file(&services.config.data.backups_dir(), &filename) {
        Ok(doc) => doc,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("{e:#}")})),
            )
                .into_response();
        }
    };
    match services.store.import_backup(&doc, ImportMode::Replace, None).await {
        Ok(summary) => Json(serde_json::to_value(summary).unwrap_or_default()).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("{e:#}")})),
        )
            .into_response(),
    }
}

// ============================================================================
// Duplex channel
// ============================================================================

async fn ws_upgrade(ws: WebSocketUpgrade, State(services): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, services))
}

async fn handle_ws(socket: WebSocket, services: AppState) {
    let (generation, mut frames) = services.broadcaster.connect();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Channel closed: a newer client took the slot.
                None => break,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Popup button actions arrive via HTTP, not the socket.
                Some(Ok(_)) => {}
            },
        }
    }
    services.broadcaster.disconnect(generation);
}

async fn push(services: &Services, envelope: PushEnvelope) {
    if let Err(e) = services.broadcaster.send(&envelope).await {
        tracing::debug!("broadcast of {} dropped: {:#}", envelope.kind, e);
    }
}

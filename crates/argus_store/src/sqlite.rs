use anyhow::{Context, Result};
use argus_core::{
    ArgusError, Contact, ContextDismissal, Event, EventStatus, EventTrigger, EventType, Guard,
    StoredMessage, TriggerKind,
};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

/// SQL fragment for the statuses eligible to appear in search results.
pub(crate) const SEARCHABLE_STATUSES: &str = "('pending', 'scheduled', 'discovered')";

/// SQL fragment for statuses excluded from active reads and dedup.
pub(crate) const INACTIVE_STATUSES: &str = "('completed', 'expired', 'ignored')";

/// Store adapter over the six collections. Writes are wrapped in the
/// safe-call guard with dead-lettering; reads degrade to empty results with
/// a logged warning. Event and trigger IDs come from process-local counters
/// seeded from `MAX(id)` at startup and reseeded after a restore.
pub struct EventStore {
    pool: Pool<Sqlite>,
    guard: Guard,
    next_event_id: AtomicI64,
    next_trigger_id: AtomicI64,
    hot_window_days: i64,
    embed_dim: usize,
}

/// Insert payload for a freshly extracted event.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct NewEvent {
    pub message_id: Option<String>,
    pub event_type: EventType,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub keywords: String,
    pub participants: Option<String>,
    pub event_time: Option<i64>,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub context_url: Option<String>,
    pub sender_name: Option<String>,
    pub confidence: f32,
}

impl EventStore {
    pub async fn open<P: AsRef<Path>>(
        db_path: P,
        guard: Guard,
        hot_window_days: i64,
        embed_dim: usize,
    ) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;
        Self::from_pool(pool, guard, hot_window_days, embed_dim).await
    }

    pub async fn open_in_memory(guard: Guard) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;
        Self::from_pool(pool, guard, 90, 768).await
    }

    async fn from_pool(
        pool: Pool<Sqlite>,
        guard: Guard,
        hot_window_days: i64,
        embed_dim: usize,
    ) -> Result<Self> {
        let store = Self {
            pool,
            guard,
            next_event_id: AtomicI64::new(1),
            next_trigger_id: AtomicI64::new(1),
            hot_window_days,
            embed_dim,
        };
        store.migrate().await?;
        store.reseed_counters().await?;
        Ok(store)
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub(crate) fn hot_window_start(&self, now: i64) -> i64 {
        now - self.hot_window_days * 86_400
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY,
                message_id TEXT,
                event_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                location TEXT,
                keywords TEXT NOT NULL DEFAULT '',
                participants TEXT,
                event_time INTEGER,
                reminder_time INTEGER,
                embedding BLOB,
                context_url TEXT,
                status TEXT NOT NULL DEFAULT 'discovered',
                dismiss_count INTEGER NOT NULL DEFAULT 0,
                sender_name TEXT,
                confidence REAL NOT NULL DEFAULT 0.5,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create events table")?;

        sqlx::query(
            "CREATE VIRTUAL TABLE IF NOT EXISTS events_fts USING fts5(title, keywords, description, location)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create events_fts index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                ingested_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create messages table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS triggers (
                id INTEGER PRIMARY KEY,
                event_id INTEGER NOT NULL,
                trigger_type TEXT NOT NULL,
                trigger_value TEXT NOT NULL,
                is_fired INTEGER NOT NULL DEFAULT 0,
                fire_count INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create triggers table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                name TEXT,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create contacts table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS context_dismissals (
                event_id INTEGER NOT NULL,
                url_pattern TEXT NOT NULL,
                dismissed_until INTEGER NOT NULL,
                PRIMARY KEY (event_id, url_pattern)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create context_dismissals table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS push_subscriptions (token TEXT PRIMARY KEY)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create push_subscriptions table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_status ON events(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_triggers_event ON triggers(event_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Seed the ID counters from `MAX(id)`. Called at startup and again after
    /// a restore so the next assigned ID never collides with imported rows.
    pub async fn reseed_counters(&self) -> Result<()> {
        let max_event: i64 = sqlx::query("SELECT COALESCE(MAX(id), 0) AS m FROM events")
            .fetch_one(&self.pool)
            .await?
            .try_get("m")?;
        let max_trigger: i64 = sqlx::query("SELECT COALESCE(MAX(id), 0) AS m FROM triggers")
            .fetch_one(&self.pool)
            .await?
            .try_get("m")?;
        self.next_event_id.store(max_event + 1, Ordering::SeqCst);
        self.next_trigger_id.store(max_trigger + 1, Ordering::SeqCst);
        Ok(())
    }

    // ========================================================================
    // Event writes
    // ========================================================================

    /// Insert an extracted event with status `discovered`. Returns the
    /// assigned ID, or −1 when the write failed (payload dead-lettered).
    pub async fn insert_event(&self, new: &NewEvent) -> Result<i64> {
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let created_at = argus_core::now_secs();
        let payload = serde_json::to_value(new).unwrap_or_default();

        self.guard
            .run_dead_letter("insert_event", -1, payload, async {
                let mut tx = self.pool.begin().await.map_err(wrap("insert", "events"))?;
                sqlx::query(
                    r#"
                    INSERT INTO events
                        (id, message_id, event_type, title, description, location, keywords,
                         participants, event_time, reminder_time, embedding, context_url,
                         status, dismiss_count, sender_name, confidence, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, 'discovered', 0, ?, ?, ?)
                    "#,
                )
                .bind(id)
                .bind(&new.message_id)
                .bind(new.event_type.as_str())
                .bind(&new.title)
                .bind(&new.description)
                .bind(&new.location)
                .bind(&new.keywords)
                .bind(&new.participants)
                .bind(new.event_time)
                .bind(new.embedding.as_deref().map(embedding_to_bytes))
                .bind(&new.context_url)
                .bind(&new.sender_name)
                .bind(new.confidence as f64)
                .bind(created_at)
                .execute(&mut *tx)
                .await
                .map_err(wrap("insert", "events"))?;

                sqlx::query(
                    "INSERT INTO events_fts (rowid, title, keywords, description, location) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(id)
                .bind(&new.title)
                .bind(&new.keywords)
                .bind(new.description.as_deref().unwrap_or(""))
                .bind(new.location.as_deref().unwrap_or(""))
                .execute(&mut *tx)
                .await
                .map_err(wrap("index", "events_fts"))?;

                tx.commit().await.map_err(wrap("commit", "events"))?;
                Ok(id)
            })
            .await
    }

    /// Transition an event through the lifecycle. Returns false when the
    /// event is missing, the transition is not permitted, or the write failed.
    pub async fn transition_event(&self, id: i64, to: EventStatus) -> Result<bool> {
        let current = match self.get_event(id).await {
            Some(e) => e,
            None => return Ok(false),
        };
        if !current.status.can_transition(to) {
            tracing::warn!(
                "rejected transition {} -> {} for event {}",
                current.status.as_str(),
                to.as_str(),
                id
            );
            return Ok(false);
        }
        let payload = serde_json::json!({"id": id, "to": to.as_str()});
        self.guard
            .run_dead_letter("transition_event", false, payload, async {
                // A discovered event carries no reminder time.
                let clear_reminder = to == EventStatus::Discovered;
                let sql = if clear_reminder {
                    "UPDATE events SET status = ?, reminder_time = NULL WHERE id = ?"
                } else {
                    "UPDATE events SET status = ? WHERE id = ?"
                };
                let result = sqlx::query(sql)
                    .bind(to.as_str())
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(wrap("update", "events"))?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    /// Schedule an event: status `scheduled` plus its derived reminder time.
    pub async fn schedule_event(&self, id: i64, reminder_time: Option<i64>) -> Result<bool> {
        let payload = serde_json::json!({"id": id, "reminder_time": reminder_time});
        self.guard
            .run_dead_letter("schedule_event", false, payload, async {
                let result = sqlx::query(
                    "UPDATE events SET status = 'scheduled', reminder_time = ? WHERE id = ?",
                )
                .bind(reminder_time)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(wrap("update", "events"))?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    /// Snooze an event until `until` (epoch seconds).
    pub async fn snooze_event(&self, id: i64, until: i64) -> Result<bool> {
        let payload = serde_json::json!({"id": id, "until": until});
        self.guard
            .run_dead_letter("snooze_event", false, payload, async {
                let result = sqlx::query(
                    "UPDATE events SET status = 'snoozed', reminder_time = ? WHERE id = ?",
                )
                .bind(until)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(wrap("update", "events"))?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    /// Apply a whitelisted field patch (PATCH endpoint and confirm-update).
    /// Unknown keys are ignored. Refreshes the search index row.
    pub async fn update_event_fields(
        &self,
        id: i64,
        patch: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool> {
        let payload = serde_json::json!({"id": id, "patch": patch});
        self.guard
            .run_dead_letter("update_event_fields", false, payload, async {
                let mut current = match self.try_get_event(id).await? {
                    Some(e) => e,
                    None => return Ok(false),
                };
                for (key, value) in patch {
                    match key.as_str() {
                        "title" => {
                            if let Some(s) = value.as_str() {
                                current.title = s.to_string();
                            }
                        }
                        "description" => current.description = value.as_str().map(String::from),
                        "location" => current.location = value.as_str().map(String::from),
                        "keywords" => {
                            if let Some(s) = value.as_str() {
                                current.keywords = s.to_string();
                            }
                        }
                        "participants" => current.participants = value.as_str().map(String::from),
                        "event_time" => current.event_time = value.as_i64(),
                        "context_url" => {
                            current.context_url =
                                value.as_str().map(|s| s.to_lowercase())
                        }
                        "event_type" => {
                            if let Some(s) = value.as_str() {
                                current.event_type = EventType::parse_str(s);
                            }
                        }
                        "confidence" => {
                            if let Some(f) = value.as_f64() {
                                current.confidence = f as f32;
                            }
                        }
                        _ => {}
                    }
                }

                let mut tx = self.pool.begin().await.map_err(wrap("update", "events"))?;
                sqlx::query(
                    r#"
                    UPDATE events SET event_type = ?, title = ?, description = ?, location = ?,
                        keywords = ?, participants = ?, event_time = ?, context_url = ?,
                        confidence = ?
                    WHERE id = ?
                    "#,
                )
                .bind(current.event_type.as_str())
                .bind(&current.title)
                .bind(&current.description)
                .bind(&current.location)
                .bind(&current.keywords)
                .bind(&current.participants)
                .bind(current.event_time)
                .bind(&current.context_url)
                .bind(current.confidence as f64)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(wrap("update", "events"))?;

                sqlx::query("DELETE FROM events_fts WHERE rowid = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(wrap("index", "events_fts"))?;
                sqlx::query(
                    "INSERT INTO events_fts (rowid, title, keywords, description, location) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(id)
                .bind(&current.title)
                .bind(&current.keywords)
                .bind(current.description.as_deref().unwrap_or(""))
                .bind(current.location.as_deref().unwrap_or(""))
                .execute(&mut *tx)
                .await
                .map_err(wrap("index", "events_fts"))?;

                tx.commit().await.map_err(wrap("commit", "events"))?;
                Ok(true)
            })
            .await
    }

    pub async fn set_context_url(&self, id: i64, context_url: &str) -> Result<bool> {
        let payload = serde_json::json!({"id": id, "context_url": context_url});
        self.guard
            .run_dead_letter("set_context_url", false, payload, async {
                let result = sqlx::query("UPDATE events SET context_url = ? WHERE id = ?")
                    .bind(context_url.to_lowercase())
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(wrap("update", "events"))?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    /// Monotonically-non-decreasing dismiss counter.
    pub async fn increment_dismiss(&self, id: i64) -> Result<bool> {
        let payload = serde_json::json!({"id": id});
        self.guard
            .run_dead_letter("increment_dismiss", false, payload, async {
                let result = sqlx::query(
                    "UPDATE events SET dismiss_count = dismiss_count + 1 WHERE id = ?",
                )
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(wrap("update", "events"))?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    pub async fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<bool> {
        if embedding.len() != self.embed_dim {
            anyhow::bail!(
                "embedding dimension {} does not match configured {}",
                embedding.len(),
                self.embed_dim
            );
        }
        let payload = serde_json::json!({"id": id});
        self.guard
            .run_dead_letter("set_embedding", false, payload, async {
                let result = sqlx::query("UPDATE events SET embedding = ? WHERE id = ?")
                    .bind(embedding_to_bytes(embedding))
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(wrap("update", "events"))?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    pub async fn delete_event(&self, id: i64) -> Result<bool> {
        let payload = serde_json::json!({"id": id});
        self.guard
            .run_dead_letter("delete_event", false, payload, async {
                let mut tx = self.pool.begin().await.map_err(wrap("delete", "events"))?;
                let result = sqlx::query("DELETE FROM events WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(wrap("delete", "events"))?;
                sqlx::query("DELETE FROM events_fts WHERE rowid = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(wrap("index", "events_fts"))?;
                sqlx::query("DELETE FROM triggers WHERE event_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(wrap("delete", "triggers"))?;
                tx.commit().await.map_err(wrap("commit", "events"))?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    // ========================================================================
    // Trigger writes
    // ========================================================================

    /// Insert a trigger with a canonical kind. Returns the ID or −1.
    pub async fn insert_trigger(
        &self,
        event_id: i64,
        kind: TriggerKind,
        value: &str,
    ) -> Result<i64> {
        let id = self.next_trigger_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::json!({
            "event_id": event_id, "kind": kind.as_str(), "value": value,
        });
        self.guard
            .run_dead_letter("insert_trigger", -1, payload, async {
                sqlx::query(
                    "INSERT INTO triggers (id, event_id, trigger_type, trigger_value, is_fired, fire_count) VALUES (?, ?, ?, ?, 0, 0)",
                )
                .bind(id)
                .bind(event_id)
                .bind(kind.as_str())
                .bind(value)
                .execute(&self.pool)
                .await
                .map_err(wrap("insert", "triggers"))?;
                Ok(id)
            })
            .await
    }

    /// Mark a trigger fired. Triggers are immutable once fired; the scan
    /// refetches unfired rows each period, so this single write is the
    /// at-most-once boundary.
    pub async fn mark_trigger_fired(&self, id: i64) -> Result<bool> {
        let payload = serde_json::json!({"id": id});
        self.guard
            .run_dead_letter("mark_trigger_fired", false, payload, async {
                let result = sqlx::query(
                    "UPDATE triggers SET is_fired = 1, fire_count = fire_count + 1 WHERE id = ? AND is_fired = 0",
                )
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(wrap("update", "triggers"))?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    // ========================================================================
    // Message / contact / dismissal / subscription writes
    // ========================================================================

    /// Upsert a message keyed by its external id. Returns whether a new row
    /// was inserted (false for duplicates and failures).
    pub async fn upsert_message(&self, msg: &StoredMessage) -> Result<bool> {
        let payload = serde_json::to_value(msg).unwrap_or_default();
        self.guard
            .run_dead_letter("upsert_message", false, payload, async {
                let result = sqlx::query(
                    "INSERT OR IGNORE INTO messages (id, chat_id, sender, content, timestamp, ingested_at) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&msg.id)
                .bind(&msg.chat_id)
                .bind(&msg.sender)
                .bind(&msg.content)
                .bind(msg.timestamp)
                .bind(msg.ingested_at)
                .execute(&self.pool)
                .await
                .map_err(wrap("insert", "messages"))?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    /// Upsert a contact: first_seen set on insert, last_seen and
    /// message_count updated on every message.
    pub async fn upsert_contact(&self, jid: &str, name: Option<&str>, ts: i64) -> Result<bool> {
        let payload = serde_json::json!({"id": jid, "name": name, "ts": ts});
        self.guard
            .run_dead_letter("upsert_contact", false, payload, async {
                sqlx::query(
                    r#"
                    INSERT INTO contacts (id, name, first_seen, last_seen, message_count)
                    VALUES (?, ?, ?, ?, 1)
                    ON CONFLICT(id) DO UPDATE SET
                        name = COALESCE(excluded.name, contacts.name),
                        last_seen = excluded.last_seen,
                        message_count = contacts.message_count + 1
                    "#,
                )
                .bind(jid)
                .bind(name)
                .bind(ts)
                .bind(ts)
                .execute(&self.pool)
                .await
                .map_err(wrap("upsert", "contacts"))?;
                Ok(true)
            })
            .await
    }

    pub async fn add_context_dismissal(
        &self,
        event_id: i64,
        url_pattern: &str,
        dismissed_until: i64,
    ) -> Result<bool> {
        let payload = serde_json::json!({
            "event_id": event_id, "url_pattern": url_pattern, "dismissed_until": dismissed_until,
        });
        self.guard
            .run_dead_letter("add_context_dismissal", false, payload, async {
                sqlx::query(
                    r#"
                    INSERT INTO context_dismissals (event_id, url_pattern, dismissed_until)
                    VALUES (?, ?, ?)
                    ON CONFLICT(event_id, url_pattern) DO UPDATE SET
                        dismissed_until = excluded.dismissed_until
                    "#,
                )
                .bind(event_id)
                .bind(url_pattern.to_lowercase())
                .bind(dismissed_until)
                .execute(&self.pool)
                .await
                .map_err(wrap("upsert", "context_dismissals"))?;
                Ok(true)
            })
            .await
    }

    pub async fn add_push_subscription(&self, token: &str) -> Result<bool> {
        let payload = serde_json::json!({"token": token});
        self.guard
            .run_dead_letter("add_push_subscription", false, payload, async {
                sqlx::query("INSERT OR IGNORE INTO push_subscriptions (token) VALUES (?)")
                    .bind(token)
                    .execute(&self.pool)
                    .await
                    .map_err(wrap("insert", "push_subscriptions"))?;
                Ok(true)
            })
            .await
    }

    // ========================================================================
    // Reads (degrade to empty on failure)
    // ========================================================================

    pub(crate) async fn try_get_event(&self, id: i64) -> Result<Option<Event>> {
        let row = sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(wrap("select", "events"))?;
        row.map(|r| event_from_row(&r)).transpose()
    }

    pub async fn get_event(&self, id: i64) -> Option<Event> {
        match self.try_get_event(id).await {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("get_event({}) failed: {:#}", id, e);
                None
            }
        }
    }

    pub async fn list_events(
        &self,
        status: Option<EventStatus>,
        limit: i64,
        offset: i64,
    ) -> Vec<Event> {
        let result = match status {
            Some(s) => {
                sqlx::query(
                    "SELECT * FROM events WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(s.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM events ORDER BY created_at DESC LIMIT ? OFFSET ?")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await
            }
        };
        rows_to_events(result, "list_events")
    }

    /// Events whose `event_time` falls inside the UTC day containing `ts`.
    pub async fn events_for_day(&self, ts: i64) -> Vec<Event> {
        let day_start = ts - ts.rem_euclid(86_400);
        let result = sqlx::query(
            "SELECT * FROM events WHERE event_time >= ? AND event_time < ? ORDER BY event_time ASC",
        )
        .bind(day_start)
        .bind(day_start + 86_400)
        .fetch_all(&self.pool)
        .await;
        rows_to_events(result, "events_for_day")
    }

    /// Most recent active events, used as action-detection candidates.
    pub async fn active_events(&self, limit: i64) -> Vec<Event> {
        let result = sqlx::query(&format!(
            "SELECT * FROM events WHERE status NOT IN {INACTIVE_STATUSES} ORDER BY created_at DESC LIMIT ?",
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        rows_to_events(result, "active_events")
    }

    /// Active events created within the duplicate-suppression window.
    pub async fn recent_active_events(&self, now: i64) -> Vec<Event> {
        let cutoff = now - argus_core::model::DUPLICATE_WINDOW_SECS;
        let result = sqlx::query(&format!(
            "SELECT * FROM events WHERE status NOT IN {INACTIVE_STATUSES} AND created_at >= ? ORDER BY created_at DESC",
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await;
        rows_to_events(result, "recent_active_events")
    }

    /// Scheduled events whose reminder time has arrived.
    pub async fn due_scheduled_events(&self, now: i64) -> Vec<Event> {
        let result = sqlx::query(
            "SELECT * FROM events WHERE status = 'scheduled' AND reminder_time IS NOT NULL AND reminder_time <= ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await;
        rows_to_events(result, "due_scheduled_events")
    }

    /// Snoozed events whose snooze has expired.
    pub async fn due_snoozed_events(&self, now: i64) -> Vec<Event> {
        let result = sqlx::query(
            "SELECT * FROM events WHERE status = 'snoozed' AND reminder_time IS NOT NULL AND reminder_time <= ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await;
        rows_to_events(result, "due_snoozed_events")
    }

    /// Events still waiting for their embedding (backfill input).
    pub async fn events_missing_embedding(&self, limit: i64) -> Vec<Event> {
        let result = sqlx::query(
            "SELECT * FROM events WHERE embedding IS NULL ORDER BY id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        rows_to_events(result, "events_missing_embedding")
    }

    /// All unfired time-kind triggers. The seven historical kind strings all
    /// parse; unknown kinds are skipped with a warning.
    pub async fn unfired_time_triggers(&self) -> Vec<EventTrigger> {
        let result = sqlx::query(
            "SELECT * FROM triggers WHERE is_fired = 0 AND trigger_type != 'url'",
        )
        .fetch_all(&self.pool)
        .await;
        match result {
            Ok(rows) => rows
                .iter()
                .filter_map(|r| match trigger_from_row(r) {
                    Ok(t) => Some(t),
                    Err(e) => {
                        tracing::warn!("skipping unreadable trigger row: {:#}", e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!("unfired_time_triggers failed: {:#}", e);
                Vec::new()
            }
        }
    }

    pub async fn triggers_for_event(&self, event_id: i64) -> Vec<EventTrigger> {
        let result = sqlx::query("SELECT * FROM triggers WHERE event_id = ?")
            .bind(event_id)
            .fetch_all(&self.pool)
            .await;
        match result {
            Ok(rows) => rows.iter().filter_map(|r| trigger_from_row(r).ok()).collect(),
            Err(e) => {
                tracing::warn!("triggers_for_event failed: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Dismissals still in force at `now` for the given events.
    pub async fn active_dismissals(&self, now: i64) -> Vec<ContextDismissal> {
        let result = sqlx::query(
            "SELECT * FROM context_dismissals WHERE dismissed_until > ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await;
        match result {
            Ok(rows) => rows
                .iter()
                .filter_map(|r| {
                    Some(ContextDismissal {
                        event_id: r.try_get("event_id").ok()?,
                        url_pattern: r.try_get("url_pattern").ok()?,
                        dismissed_until: r.try_get("dismissed_until").ok()?,
                    })
                })
                .collect(),
            Err(e) => {
                tracing::warn!("active_dismissals failed: {:#}", e);
                Vec::new()
            }
        }
    }

    pub async fn get_contact(&self, jid: &str) -> Option<Contact> {
        let row = sqlx::query("SELECT * FROM contacts WHERE id = ?")
            .bind(jid)
            .fetch_optional(&self.pool)
            .await
            .ok()??;
        Some(Contact {
            id: row.try_get("id").ok()?,
            name: row.try_get("name").ok()?,
            first_seen: row.try_get("first_seen").ok()?,
            last_seen: row.try_get("last_seen").ok()?,
            message_count: row.try_get("message_count").ok()?,
        })
    }

    /// Last `limit` messages in a chat, most recent first.
    pub async fn recent_chat_messages(&self, chat_id: &str, limit: i64) -> Vec<StoredMessage> {
        let result = sqlx::query(
            "SELECT * FROM messages WHERE chat_id = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        match result {
            Ok(rows) => rows.iter().filter_map(|r| message_from_row(r).ok()).collect(),
            Err(e) => {
                tracing::warn!("recent_chat_messages failed: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Counts by status for `/api/stats` and backup headers.
    pub async fn status_counts(&self) -> Vec<(String, i64)> {
        let result = sqlx::query("SELECT status, COUNT(*) AS n FROM events GROUP BY status")
            .fetch_all(&self.pool)
            .await;
        match result {
            Ok(rows) => rows
                .iter()
                .filter_map(|r| Some((r.try_get("status").ok()?, r.try_get("n").ok()?)))
                .collect(),
            Err(e) => {
                tracing::warn!("status_counts failed: {:#}", e);
                Vec::new()
            }
        }
    }

    pub async fn collection_count(&self, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) AS n FROM {table}");
        match sqlx::query(&sql).fetch_one(&self.pool).await {
            Ok(row) => row.try_get("n").unwrap_or(0),
            Err(e) => {
                tracing::warn!("collection_count({}) failed: {:#}", table, e);
                0
            }
        }
    }
}

fn wrap(operation: &'static str, collection: &'static str) -> impl Fn(sqlx::Error) -> anyhow::Error {
    move |e| anyhow::Error::new(e).context(ArgusError::store(operation, collection))
}

pub(crate) fn rows_to_events(
    result: std::result::Result<Vec<SqliteRow>, sqlx::Error>,
    context: &str,
) -> Vec<Event> {
    match result {
        Ok(rows) => rows
            .iter()
            .filter_map(|r| match event_from_row(r) {
                Ok(e) => Some(e),
                Err(err) => {
                    tracing::warn!("{}: unreadable event row: {:#}", context, err);
                    None
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("{} failed: {:#}", context, e);
            Vec::new()
        }
    }
}

pub(crate) fn event_from_row(row: &SqliteRow) -> Result<Event> {
    let status_str: String = row.try_get("status")?;
    let type_str: String = row.try_get("event_type")?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    Ok(Event {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        event_type: EventType::parse_str(&type_str),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        keywords: row.try_get("keywords")?,
        participants: row.try_get("participants")?,
        event_time: row.try_get("event_time")?,
        reminder_time: row.try_get("reminder_time")?,
        embedding: embedding.map(|b| bytes_to_embedding(&b)),
        context_url: row.try_get("context_url")?,
        status: EventStatus::parse_str(&status_str).unwrap_or(EventStatus::Discovered),
        dismiss_count: row.try_get("dismiss_count")?,
        sender_name: row.try_get("sender_name")?,
        confidence: row.try_get::<f64, _>("confidence")? as f32,
        created_at: row.try_get("created_at")?,
    })
}

fn trigger_from_row(row: &SqliteRow) -> Result<EventTrigger> {
    let kind_str: String = row.try_get("trigger_type")?;
    let kind = TriggerKind::parse_str(&kind_str)
        .ok_or_else(|| anyhow::anyhow!("unknown trigger kind '{kind_str}'"))?;
    Ok(EventTrigger {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        kind,
        value: row.try_get("trigger_value")?,
        is_fired: row.try_get::<i64, _>("is_fired")? != 0,
        fire_count: row.try_get("fire_count")?,
    })
}

pub(crate) fn message_from_row(row: &SqliteRow) -> Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        sender: row.try_get("sender")?,
        content: row.try_get("content")?,
        timestamp: row.try_get("timestamp")?,
        ingested_at: row.try_get("ingested_at")?,
    })
}

pub fn embedding_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for f in v {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

pub fn bytes_to_embedding(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

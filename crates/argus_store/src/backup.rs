//! Backup engine: streamed full-store export, merge/replace import, and
//! retention pruning for daily snapshots.
//!
//! The export is one JSON document with `counts` placed before `indices` so
//! the first few hundred bytes suffice to read per-collection counts without
//! parsing the body. Event rows are exported without their embedding.

use crate::sqlite::{event_from_row, message_from_row, EventStore};
use anyhow::{bail, Context, Result};
use argus_core::{Contact, ContextDismissal, Event, EventTrigger, StoredMessage, TriggerKind};
use serde::Serialize;
use sqlx::Row;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const BACKUP_VERSION: &str = "1.0";

/// Rows fetched per page during the scroll export.
const PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Merge,
    Replace,
}

impl ImportMode {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "merge" => Some(Self::Merge),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupCounts {
    pub events: i64,
    pub messages: i64,
    pub triggers: i64,
    pub contacts: i64,
    #[serde(rename = "contextDismissals")]
    pub context_dismissals: i64,
    #[serde(rename = "pushSubscriptions")]
    pub push_subscriptions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub mode: String,
    pub imported: BackupCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupFileInfo {
    pub filename: String,
    pub size_bytes: u64,
}

/// Backup file names are pinned to `argus-backup-YYYY-MM-DD.json`; restore
/// refuses anything else.
pub fn is_backup_filename(name: &str) -> bool {
    let re = regex::Regex::new(r"^argus-backup-\d{4}-\d{2}-\d{2}\.json$").unwrap();
    re.is_match(name)
}

pub fn backup_filename(date: chrono::NaiveDate) -> String {
    format!("argus-backup-{}.json", date.format("%Y-%m-%d"))
}

impl EventStore {
    /// Stream the entire store into `w` as a single backup document. Pages
    /// through each collection so no full-collection buffer is held.
    pub async fn export_to_writer<W: Write>(&self, w: &mut W, source: &str) -> Result<BackupCounts> {
        let counts = BackupCounts {
            events: self.collection_count("events").await,
            messages: self.collection_count("messages").await,
            triggers: self.collection_count("triggers").await,
            contacts: self.collection_count("contacts").await,
            context_dismissals: self.collection_count("context_dismissals").await,
            push_subscriptions: self.collection_count("push_subscriptions").await,
        };

        write!(
            w,
            r#"{{"version":"{}","exportedAt":{},"source":{},"counts":{},"indices":{{"#,
            BACKUP_VERSION,
            serde_json::to_string(&chrono::Utc::now().to_rfc3339())?,
            serde_json::to_string(source)?,
            serde_json::to_string(&counts)?,
        )?;

        write!(w, r#""events":["#)?;
        let mut first = true;
        let mut last_id = 0i64;
        loop {
            let rows = sqlx::query("SELECT * FROM events WHERE id > ? ORDER BY id ASC LIMIT ?")
                .bind(last_id)
                .bind(PAGE_SIZE)
                .fetch_all(self.pool())
                .await?;
            if rows.is_empty() {
                break;
            }
            for row in &rows {
                let mut event = event_from_row(row)?;
                last_id = event.id;
                event.embedding = None;
                if !first {
                    write!(w, ",")?;
                }
                first = false;
                serde_json::to_writer(&mut *w, &event)?;
            }
        }
        write!(w, "],")?;

        write!(w, r#""messages":["#)?;
        self.export_pages(w, "SELECT * FROM messages ORDER BY id ASC LIMIT ? OFFSET ?", |row| {
            message_from_row(row).and_then(|m| serde_json::to_value(m).map_err(Into::into))
        })
        .await?;
        write!(w, "],")?;

        write!(w, r#""triggers":["#)?;
        self.export_pages(w, "SELECT * FROM triggers ORDER BY id ASC LIMIT ? OFFSET ?", |row| {
            let kind_str: String = row.try_get("trigger_type")?;
            Ok(serde_json::json!({
                "id": row.try_get::<i64, _>("id")?,
                "event_id": row.try_get::<i64, _>("event_id")?,
                "kind": kind_str,
                "value": row.try_get::<String, _>("trigger_value")?,
                "is_fired": row.try_get::<i64, _>("is_fired")? != 0,
                "fire_count": row.try_get::<i64, _>("fire_count")?,
            }))
        })
        .await?;
        write!(w, "],")?;

        write!(w, r#""contacts":["#)?;
        self.export_pages(w, "SELECT * FROM contacts ORDER BY id ASC LIMIT ? OFFSET ?", |row| {
            Ok(serde_json::json!({
                "id": row.try_get::<String, _>("id")?,
                "name": row.try_get::<Option<String>, _>("name")?,
                "first_seen": row.try_get::<i64, _>("first_seen")?,
                "last_seen": row.try_get::<i64, _>("last_seen")?,
                "message_count": row.try_get::<i64, _>("message_count")?,
            }))
        })
        .await?;
        write!(w, "],")?;

        write!(w, r#""contextDismissals":["#)?;
        self.export_pages(
            w,
            "SELECT * FROM context_dismissals ORDER BY event_id ASC LIMIT ? OFFSET ?",
            |row| {
                Ok(serde_json::json!({
                    "event_id": row.try_get::<i64, _>("event_id")?,
                    "url_pattern": row.try_get::<String, _>("url_pattern")?,
                    "dismissed_until": row.try_get::<i64, _>("dismissed_until")?,
                }))
            },
        )
        .await?;
        write!(w, "],")?;

        write!(w, r#""pushSubscriptions":["#)?;
        self.export_pages(
            w,
            "SELECT * FROM push_subscriptions ORDER BY token ASC LIMIT ? OFFSET ?",
            |row| Ok(serde_json::Value::String(row.try_get::<String, _>("token")?)),
        )
        .await?;
        write!(w, "]}}}}")?;

        Ok(counts)
    }

    async fn export_pages<W: Write>(
        &self,
        w: &mut W,
        sql: &str,
        to_value: impl Fn(&sqlx::sqlite::SqliteRow) -> Result<serde_json::Value>,
    ) -> Result<()> {
        let mut offset = 0i64;
        let mut first = true;
        loop {
            let rows = sqlx::query(sql)
                .bind(PAGE_SIZE)
                .bind(offset)
                .fetch_all(self.pool())
                .await?;
            if rows.is_empty() {
                return Ok(());
            }
            offset += rows.len() as i64;
            for row in &rows {
                if !first {
                    write!(w, ",")?;
                }
                first = false;
                serde_json::to_writer(&mut *w, &to_value(row)?)?;
            }
        }
    }

    /// Import a backup document. `indices` restricts which collections are
    /// touched (None = all). Replace mode clears each selected collection
    /// first. Counters are reseeded afterwards so future IDs never collide.
    pub async fn import_backup(
        &self,
        doc: &serde_json::Value,
        mode: ImportMode,
        indices: Option<&[String]>,
    ) -> Result<ImportSummary> {
        let body = doc
            .get("indices")
            .and_then(|v| v.as_object())
            .context("backup document has no 'indices' object")?;

        let selected = |name: &str| -> bool {
            indices.map_or(true, |list| list.iter().any(|i| i == name))
        };
        let mut imported = BackupCounts {
            events: 0,
            messages: 0,
            triggers: 0,
            contacts: 0,
            context_dismissals: 0,
            push_subscriptions: 0,
        };

        if selected("events") {
            if mode == ImportMode::Replace {
                sqlx::query("DELETE FROM events").execute(self.pool()).await?;
                sqlx::query("DELETE FROM events_fts").execute(self.pool()).await?;
            }
            for row in array_of(body, "events") {
                let event: Event = serde_json::from_value(row.clone())
                    .context("unreadable event row in backup")?;
                self.import_event_row(&event).await?;
                imported.events += 1;
            }
        }

        if selected("messages") {
            if mode == ImportMode::Replace {
                sqlx::query("DELETE FROM messages").execute(self.pool()).await?;
            }
            for row in array_of(body, "messages") {
                let msg: StoredMessage = serde_json::from_value(row.clone())
                    .context("unreadable message row in backup")?;
                sqlx::query(
                    "INSERT OR REPLACE INTO messages (id, chat_id, sender, content, timestamp, ingested_at) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&msg.id)
                .bind(&msg.chat_id)
                .bind(&msg.sender)
                .bind(&msg.content)
                .bind(msg.timestamp)
                .bind(msg.ingested_at)
                .execute(self.pool())
                .await?;
                imported.messages += 1;
            }
        }

        if selected("triggers") {
            if mode == ImportMode::Replace {
                sqlx::query("DELETE FROM triggers").execute(self.pool()).await?;
            }
            for row in array_of(body, "triggers") {
                let trigger = trigger_from_value(row)?;
                sqlx::query(
                    "INSERT OR REPLACE INTO triggers (id, event_id, trigger_type, trigger_value, is_fired, fire_count) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(trigger.id)
                .bind(trigger.event_id)
                .bind(trigger.kind.as_str())
                .bind(&trigger.value)
                .bind(trigger.is_fired as i64)
                .bind(trigger.fire_count)
                .execute(self.pool())
                .await?;
                imported.triggers += 1;
            }
        }

        if selected("contacts") {
            if mode == ImportMode::Replace {
                sqlx::query("DELETE FROM contacts").execute(self.pool()).await?;
            }
            for row in array_of(body, "contacts") {
                let contact: Contact = serde_json::from_value(row.clone())
                    .context("unreadable contact row in backup")?;
                sqlx::query(
                    "INSERT OR REPLACE INTO contacts (id, name, first_seen, last_seen, message_count) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&contact.id)
                .bind(&contact.name)
                .bind(contact.first_seen)
                .bind(contact.last_seen)
                .bind(contact.message_count)
                .execute(self.pool())
                .await?;
                imported.contacts += 1;
            }
        }

        if selected("contextDismissals") {
            if mode == ImportMode::Replace {
                sqlx::query("DELETE FROM context_dismissals")
                    .execute(self.pool())
                    .await?;
            }
            for row in array_of(body, "contextDismissals") {
                let d: ContextDismissal = serde_json::from_value(row.clone())
                    .context("unreadable dismissal row in backup")?;
                sqlx::query(
                    "INSERT OR REPLACE INTO context_dismissals (event_id, url_pattern, dismissed_until) VALUES (?, ?, ?)",
                )
                .bind(d.event_id)
                .bind(&d.url_pattern)
                .bind(d.dismissed_until)
                .execute(self.pool())
                .await?;
                imported.context_dismissals += 1;
            }
        }

        if selected("pushSubscriptions") {
            if mode == ImportMode::Replace {
                sqlx::query("DELETE FROM push_subscriptions")
                    .execute(self.pool())
                    .await?;
            }
            for row in array_of(body, "pushSubscriptions") {
                if let Some(token) = row.as_str() {
                    sqlx::query("INSERT OR IGNORE INTO push_subscriptions (token) VALUES (?)")
                        .bind(token)
                        .execute(self.pool())
                        .await?;
                    imported.push_subscriptions += 1;
                }
            }
        }

        self.reseed_counters().await?;

        Ok(ImportSummary {
            mode: match mode {
                ImportMode::Merge => "merge".to_string(),
                ImportMode::Replace => "replace".to_string(),
            },
            imported,
        })
    }

    async fn import_event_row(&self, event: &Event) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO events
                (id, message_id, event_type, title, description, location, keywords,
                 participants, event_time, reminder_time, embedding, context_url,
                 status, dismiss_count, sender_name, confidence, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id)
        .bind(&event.message_id)
        .bind(event.event_type.as_str())
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.location)
        .bind(&event.keywords)
        .bind(&event.participants)
        .bind(event.event_time)
        .bind(event.reminder_time)
        .bind(&event.context_url)
        .bind(event.status.as_str())
        .bind(event.dismiss_count)
        .bind(&event.sender_name)
        .bind(event.confidence as f64)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM events_fts WHERE rowid = ?")
            .bind(event.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO events_fts (rowid, title, keywords, description, location) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.keywords)
        .bind(event.description.as_deref().unwrap_or(""))
        .bind(event.location.as_deref().unwrap_or(""))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn array_of<'a>(
    body: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> std::slice::Iter<'a, serde_json::Value> {
    body.get(key)
        .and_then(|v| v.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[])
        .iter()
}

/// Triggers in older backups carry any of the seven historical kind strings;
/// all are accepted and re-emitted canonically.
fn trigger_from_value(value: &serde_json::Value) -> Result<EventTrigger> {
    let kind_str = value
        .get("kind")
        .or_else(|| value.get("trigger_type"))
        .and_then(|v| v.as_str())
        .context("trigger row missing kind")?;
    let kind = TriggerKind::parse_str(kind_str)
        .with_context(|| format!("unknown trigger kind '{kind_str}'"))?;
    Ok(EventTrigger {
        id: value.get("id").and_then(|v| v.as_i64()).context("trigger row missing id")?,
        event_id: value
            .get("event_id")
            .and_then(|v| v.as_i64())
            .context("trigger row missing event_id")?,
        kind,
        value: value
            .get("value")
            .or_else(|| value.get("trigger_value"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        is_fired: value.get("is_fired").and_then(|v| v.as_bool()).unwrap_or(false),
        fire_count: value.get("fire_count").and_then(|v| v.as_i64()).unwrap_or(0),
    })
}

/// List backup files in a directory, most recent name first.
pub fn list_backups(dir: &Path) -> Vec<BackupFileInfo> {
    let mut files: Vec<BackupFileInfo> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .filter_map(|entry| {
                let filename = entry.file_name().to_string_lossy().to_string();
                if !is_backup_filename(&filename) {
                    return None;
                }
                let size_bytes = entry.metadata().ok()?.len();
                Some(BackupFileInfo { filename, size_bytes })
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort_by(|a, b| b.filename.cmp(&a.filename));
    files
}

/// Delete backups whose embedded date is older than the retention window.
pub fn prune_backups(dir: &Path, retention_days: i64, today: chrono::NaiveDate) -> Vec<PathBuf> {
    let cutoff = today - chrono::Duration::days(retention_days);
    let mut removed = Vec::new();
    for info in list_backups(dir) {
        let date_part = info
            .filename
            .trim_start_matches("argus-backup-")
            .trim_end_matches(".json");
        let Ok(date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };
        if date < cutoff {
            let path = dir.join(&info.filename);
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!("pruned old backup {}", path.display());
                    removed.push(path);
                }
                Err(e) => tracing::warn!("failed to prune {}: {}", path.display(), e),
            }
        }
    }
    removed
}

/// Read and validate a backup file for restore. The filename must match the
/// daily-snapshot pattern exactly.
pub fn read_backup_file(dir: &Path, filename: &str) -> Result<serde_json::Value> {
    if !is_backup_filename(filename) {
        bail!("invalid backup filename '{filename}'");
    }
    let path = dir.join(filename);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read backup {}", path.display()))?;
    serde_json::from_str(&content).context("backup file is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_filename_validation() {
        assert!(is_backup_filename("argus-backup-2026-08-02.json"));
        assert!(!is_backup_filename("argus-backup-2026-8-2.json"));
        assert!(!is_backup_filename("../../etc/passwd"));
        assert!(!is_backup_filename("argus-backup-2026-08-02.json.bak"));
        assert!(!is_backup_filename("other-backup-2026-08-02.json"));
    }

    #[test]
    fn test_backup_filename_for_date() {
        let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 2).unwrap();
        assert_eq!(backup_filename(date), "argus-backup-2026-08-02.json");
        assert!(is_backup_filename(&backup_filename(date)));
    }

    #[test]
    fn test_trigger_from_value_accepts_legacy_kinds() {
        for (raw, canonical) in [
            ("reminder_24h", "time_24h"),
            ("reminder_1hr", "time_1h"),
            ("reminder_15m", "time_15m"),
            ("time", "time"),
            ("time_24h", "time_24h"),
        ] {
            let value = serde_json::json!({
                "id": 1, "event_id": 2, "kind": raw, "value": "2026-08-02T10:00:00Z",
            });
            let trigger = trigger_from_value(&value).unwrap();
            assert_eq!(trigger.kind.as_str(), canonical);
        }
        let bad = serde_json::json!({"id": 1, "event_id": 2, "kind": "lunar_phase", "value": ""});
        assert!(trigger_from_value(&bad).is_err());
    }

    #[test]
    fn test_prune_keeps_recent_backups() {
        let dir = tempfile::tempdir().unwrap();
        let today = chrono::NaiveDate::from_ymd_opt(2026, 8, 10).unwrap();
        for name in [
            "argus-backup-2026-08-09.json",
            "argus-backup-2026-08-01.json",
            "argus-backup-2026-07-01.json",
            "not-a-backup.json",
        ] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }

        let removed = prune_backups(dir.path(), 7, today);
        assert_eq!(removed.len(), 2);
        assert!(dir.path().join("argus-backup-2026-08-09.json").exists());
        assert!(!dir.path().join("argus-backup-2026-08-01.json").exists());
        assert!(!dir.path().join("argus-backup-2026-07-01.json").exists());
        assert!(dir.path().join("not-a-backup.json").exists());
    }

    #[test]
    fn test_restore_rejects_bad_filename() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_backup_file(dir.path(), "../../secrets.json").is_err());
    }
}

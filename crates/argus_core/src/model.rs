use serde::{Deserialize, Serialize};

/// Seconds before an event's `event_time` at which time triggers fire:
/// 24 hours, 1 hour, 15 minutes.
pub const TRIGGER_OFFSETS_SECS: [i64; 3] = [86_400, 3_600, 900];

/// Window for duplicate suppression: only events created within the last
/// 48 hours participate.
pub const DUPLICATE_WINDOW_SECS: i64 = 48 * 3_600;

/// Classification assigned to an extracted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Meeting,
    Deadline,
    Reminder,
    Travel,
    Task,
    Subscription,
    Recommendation,
    #[default]
    Other,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meeting => "meeting",
            Self::Deadline => "deadline",
            Self::Reminder => "reminder",
            Self::Travel => "travel",
            Self::Task => "task",
            Self::Subscription => "subscription",
            Self::Recommendation => "recommendation",
            Self::Other => "other",
        }
    }

    /// Parse from string, falling back to `Other` for anything unrecognized.
    pub fn parse_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "meeting" => Self::Meeting,
            "deadline" => Self::Deadline,
            "reminder" => Self::Reminder,
            "travel" => Self::Travel,
            "task" => Self::Task,
            "subscription" => Self::Subscription,
            "recommendation" => Self::Recommendation,
            _ => Self::Other,
        }
    }
}

/// Lifecycle state of an event.
///
/// `Pending` is a legacy alias for `Discovered` kept for rows written by
/// older deployments; it behaves as an active state everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Discovered,
    Scheduled,
    Snoozed,
    Ignored,
    Reminded,
    Completed,
    Expired,
    Pending,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Scheduled => "scheduled",
            Self::Snoozed => "snoozed",
            Self::Ignored => "ignored",
            Self::Reminded => "reminded",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Pending => "pending",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "discovered" => Some(Self::Discovered),
            "scheduled" => Some(Self::Scheduled),
            "snoozed" => Some(Self::Snoozed),
            "ignored" => Some(Self::Ignored),
            "reminded" => Some(Self::Reminded),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }

    /// Statuses excluded from active search and duplicate detection.
    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Ignored)
    }

    pub fn is_active(&self) -> bool {
        !self.is_inactive()
    }

    /// Statuses eligible to appear in hybrid search results.
    pub fn is_searchable(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled | Self::Discovered)
    }

    /// Statuses for which a fired trigger still delivers a notification.
    pub fn is_deliverable(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Scheduled | Self::Discovered | Self::Reminded
        )
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    pub fn can_transition(&self, to: EventStatus) -> bool {
        use EventStatus::*;
        if *self == to {
            return false;
        }
        match self {
            Discovered | Pending => matches!(to, Scheduled | Snoozed | Ignored | Completed),
            Scheduled => matches!(to, Reminded | Snoozed | Ignored | Completed | Expired),
            Snoozed => matches!(to, Discovered | Ignored | Completed | Expired),
            Reminded => matches!(to, Completed | Ignored | Expired | Snoozed),
            Ignored => matches!(to, Discovered),
            Completed | Expired => false,
        }
    }
}

/// An immutable chat message as delivered by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Stable external identifier (dedup key).
    pub id: String,
    pub chat_id: String,
    pub sender: String,
    pub content: String,
    /// Originating timestamp (seconds since epoch).
    pub timestamp: i64,
    /// When this process ingested the message.
    pub ingested_at: i64,
}

/// The central entity: a structured event extracted from chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    /// Originating message; null for backup-restored rows.
    #[serde(default)]
    pub message_id: Option<String>,
    pub event_type: EventType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Comma-separated keyword list.
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub participants: Option<String>,
    /// Seconds since epoch; null when the source text had no resolvable time.
    #[serde(default)]
    pub event_time: Option<i64>,
    /// Earliest scheduled trigger firing time, or the snooze-until time.
    #[serde(default)]
    pub reminder_time: Option<i64>,
    /// Fixed-dimension embedding; null when the embedding RPC failed at
    /// ingest (filled by the backfill job). Omitted from backup exports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Lowercase substring tested against browser-visited URLs.
    #[serde(default)]
    pub context_url: Option<String>,
    pub status: EventStatus,
    #[serde(default)]
    pub dismiss_count: i64,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub created_at: i64,
}

impl Event {
    /// Concatenated text used for embeddings and overlap scoring.
    pub fn semantic_text(&self) -> String {
        let mut parts = vec![self.title.clone()];
        if let Some(d) = &self.description {
            parts.push(d.clone());
        }
        if !self.keywords.is_empty() {
            parts.push(self.keywords.clone());
        }
        if let Some(l) = &self.location {
            parts.push(l.clone());
        }
        parts.join(" ")
    }

    /// Compact reference carried in conflict-warning payloads.
    pub fn conflict_ref(&self) -> ConflictRef {
        ConflictRef {
            id: self.id,
            title: self.title.clone(),
            event_time: self.event_time,
        }
    }
}

/// Reference to a clashing event included in broadcast payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRef {
    pub id: i64,
    pub title: String,
    pub event_time: Option<i64>,
}

/// Trigger kinds. `Time` is a legacy kind accepted at read time; the
/// `reminder_*` aliases from older deployments parse to their canonical
/// `time_*` equivalents and are never written back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    #[serde(rename = "time_24h")]
    Time24h,
    #[serde(rename = "time_1h")]
    Time1h,
    #[serde(rename = "time_15m")]
    Time15m,
    #[serde(rename = "url")]
    Url,
    #[serde(rename = "time")]
    Time,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time24h => "time_24h",
            Self::Time1h => "time_1h",
            Self::Time15m => "time_15m",
            Self::Url => "url",
            Self::Time => "time",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "time_24h" | "reminder_24h" => Some(Self::Time24h),
            "time_1h" | "reminder_1hr" => Some(Self::Time1h),
            "time_15m" | "reminder_15m" => Some(Self::Time15m),
            "url" => Some(Self::Url),
            "time" => Some(Self::Time),
            _ => None,
        }
    }

    pub fn is_time_kind(&self) -> bool {
        !matches!(self, Self::Url)
    }

    /// Offset before `event_time` at which this kind fires, if any.
    pub fn offset_secs(&self) -> Option<i64> {
        match self {
            Self::Time24h => Some(86_400),
            Self::Time1h => Some(3_600),
            Self::Time15m => Some(900),
            _ => None,
        }
    }
}

/// A scheduled firing condition attached to an event. Immutable once fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTrigger {
    pub id: i64,
    pub event_id: i64,
    pub kind: TriggerKind,
    /// ISO-8601 timestamp for time kinds, lowercase URL substring for `url`.
    pub value: String,
    pub is_fired: bool,
    pub fire_count: i64,
}

/// Suppresses a context reminder for a URL pattern until a deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDismissal {
    pub event_id: i64,
    pub url_pattern: String,
    pub dismissed_until: i64,
}

/// A chat contact with interaction bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: Option<String>,
    pub first_seen: i64,
    pub last_seen: i64,
    pub message_count: i64,
}

/// Earliest future trigger time for a scheduled event, per the lifecycle
/// invariant: the earliest of {event_time − 24h, −1h, −15m} strictly greater
/// than `now`, or None when the event is too close (or past).
pub fn earliest_reminder_time(event_time: i64, now: i64) -> Option<i64> {
    TRIGGER_OFFSETS_SECS
        .iter()
        .map(|off| event_time - off)
        .filter(|t| *t > now)
        .min()
}

/// Trigger kinds (with their fire times) that are still in the future for a
/// given `event_time`. Used when an event is scheduled.
pub fn future_trigger_times(event_time: i64, now: i64) -> Vec<(TriggerKind, i64)> {
    [
        (TriggerKind::Time24h, event_time - 86_400),
        (TriggerKind::Time1h, event_time - 3_600),
        (TriggerKind::Time15m, event_time - 900),
    ]
    .into_iter()
    .filter(|(_, t)| *t > now)
    .collect()
}

pub mod cache;
pub mod config;
pub mod envelope;
pub mod error;
pub mod model;
pub mod notify;
pub mod popup;

pub use cache::{CacheStats, ResponseCache};
pub use config::{ArgusConfig, TierMode};
pub use envelope::{retry_with_backoff, with_deadline, DeadLetter, Guard, RetrySchedule};
pub use error::{is_retryable, ArgusError};
pub use model::{
    earliest_reminder_time, future_trigger_times, ConflictRef, Contact, ContextDismissal, Event,
    EventStatus, EventTrigger, EventType, StoredMessage, TriggerKind,
};
pub use notify::{NotificationSink, PushEnvelope};
pub use popup::{HeaderClass, PopupBlueprint, PopupButton, PopupType, CLIENT_ACTIONS};

/// Current Unix time in seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

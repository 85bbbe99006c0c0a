//! The notification envelope and the sink seam between the pipeline /
//! scheduler and the broadcast transport.

use crate::popup::PopupBlueprint;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server → client duplex-channel message kinds.
pub mod kind {
    pub const NOTIFICATION: &str = "notification";
    pub const TRIGGER: &str = "trigger";
    pub const CONTEXT_REMINDER: &str = "context_reminder";
    pub const CONFLICT_WARNING: &str = "conflict_warning";
    pub const UPDATE_CONFIRM: &str = "update_confirm";
    pub const ACTION_PERFORMED: &str = "action_performed";
    pub const EVENT_COMPLETED: &str = "event_completed";
    pub const EVENT_SCHEDULED: &str = "event_scheduled";
    pub const EVENT_SNOOZED: &str = "event_snoozed";
    pub const EVENT_IGNORED: &str = "event_ignored";
    pub const EVENT_DISMISSED: &str = "event_dismissed";
    pub const EVENT_DELETED: &str = "event_deleted";
    pub const EVENT_UPDATED: &str = "event_updated";
    pub const EVENT_ACKNOWLEDGED: &str = "event_acknowledged";
}

/// JSON envelope pushed over the duplex channel. Every message carries at
/// minimum `type`; event, popup, and free-form fields ride along as needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<Value>,
    #[serde(rename = "popupType", skip_serializing_if = "Option::is_none")]
    pub popup_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popup: Option<PopupBlueprint>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl PushEnvelope {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            event: None,
            popup_type: None,
            popup: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_event(mut self, event: Value) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_popup(mut self, popup: PopupBlueprint) -> Self {
        self.popup_type = Some(popup.popup_type.as_str().to_string());
        self.popup = Some(popup);
        self
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Where notifications go. Implemented by the WebSocket broadcaster; tests
/// plug in recording or failing sinks.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one envelope. An error means the transport did not accept it
    /// (e.g. no client connected) and the caller may retry later.
    async fn send(&self, envelope: &PushEnvelope) -> Result<()>;

    fn is_connected(&self) -> bool;
}

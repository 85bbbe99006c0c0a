//! Webhook payload shapes as delivered by the chat bridge. Parsing returns
//! either a typed value or a structured error; nothing downstream sees raw
//! JSON.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Envelope posted by the bridge. Only `messages.upsert` events carry chat
/// messages; everything else is acknowledged and skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    #[serde(default)]
    pub instance: Option<String>,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub key: MessageKey,
    #[serde(rename = "pushName", default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub message: Option<MessageBody>,
    #[serde(rename = "messageTimestamp", default)]
    pub message_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageKey {
    #[serde(rename = "remoteJid")]
    pub remote_jid: String,
    #[serde(rename = "fromMe", default)]
    pub from_me: bool,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(rename = "extendedTextMessage", default)]
    pub extended_text_message: Option<ExtendedText>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtendedText {
    pub text: String,
}

impl WebhookPayload {
    /// Parse with a structured error suitable for a 400 response body.
    pub fn parse(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone()).context("webhook payload failed shape validation")
    }

    pub fn is_message_upsert(&self) -> bool {
        self.event == "messages.upsert"
    }

    /// The textual content, wherever the bridge put it.
    pub fn text(&self) -> Option<&str> {
        let body = self.data.message.as_ref()?;
        if let Some(text) = body.conversation.as_deref() {
            if !text.trim().is_empty() {
                return Some(text);
            }
        }
        body.extended_text_message
            .as_ref()
            .map(|e| e.text.as_str())
            .filter(|t| !t.trim().is_empty())
    }

    /// Group chats use the `@g.us` JID suffix.
    pub fn is_group(&self) -> bool {
        self.data.key.remote_jid.ends_with("@g.us")
    }
}

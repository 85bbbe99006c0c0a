//! Request and response bodies for the HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct ContextCheckRequest {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextCheckResponse {
    pub matched: bool,
    pub events: Vec<Value>,
    pub confidence: f32,
    pub context_triggers: Vec<Value>,
    pub context_triggers_count: usize,
}

impl ContextCheckResponse {
    pub fn empty() -> Self {
        Self {
            matched: false,
            events: Vec::new(),
            confidence: 0.0,
            context_triggers: Vec::new(),
            context_triggers_count: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub history: Option<Vec<ChatTurn>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub events: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormCheckRequest {
    pub field_value: String,
    pub field_type: String,
    #[serde(default)]
    pub parsed: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnoozeParams {
    #[serde(default)]
    pub minutes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetReminderRequest {
    #[serde(default)]
    pub event_time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DismissRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextUrlRequest {
    pub context_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRequest {
    pub backup: Value,
    pub mode: String,
    #[serde(default)]
    pub indices: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_check_request_field_names() {
        let body: FormCheckRequest = serde_json::from_str(
            r#"{"fieldValue": "2026-08-09", "fieldType": "date", "parsed": 1786550400}"#,
        )
        .unwrap();
        assert_eq!(body.field_value, "2026-08-09");
        assert_eq!(body.field_type, "date");
        assert_eq!(body.parsed, Some(serde_json::json!(1786550400i64)));
    }

    #[test]
    fn test_context_check_response_shape() {
        let response = ContextCheckResponse::empty();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["matched"], false);
        assert!(json["contextTriggers"].as_array().unwrap().is_empty());
        assert_eq!(json["contextTriggersCount"], 0);
    }
}

pub mod blueprint;
pub mod heuristics;
pub mod llm;
pub mod ops;
pub mod parse;
pub mod prompts;
pub mod providers;
pub mod tier;

pub use blueprint::generate_popup;
pub use llm::LlmClient;
pub use providers::mock::MockLlm;
pub use providers::openai::OpenAiClient;
pub use tier::{ProbeFn, ProbeFuture, TierOrchestrator, TierStatus};

use argus_core::Event;
use serde::{Deserialize, Serialize};

fn default_confidence() -> f32 {
    0.7
}

/// An event proposed by the analyzer (LLM or heuristic) before persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventProposal {
    #[serde(default)]
    pub event_type: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// ISO-8601 timestamp or null when the text carries no resolvable time.
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// String or array; models disagree, both are accepted.
    #[serde(default)]
    pub participants: serde_json::Value,
    #[serde(default)]
    pub keywords: serde_json::Value,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// "create" (default) or "modify" with a target event.
    #[serde(default)]
    pub event_action: Option<String>,
    #[serde(default)]
    pub target_event_id: Option<i64>,
}

impl EventProposal {
    pub fn is_modify(&self) -> bool {
        self.event_action.as_deref() == Some("modify") && self.target_event_id.is_some()
    }

    /// Comma-joined keywords whether the model sent a string or an array.
    pub fn keywords_string(&self) -> String {
        join_string_or_array(&self.keywords)
    }

    pub fn participants_string(&self) -> Option<String> {
        let joined = join_string_or_array(&self.participants);
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }

    /// Resolve `event_time` to epoch seconds. Accepts RFC 3339 with offset;
    /// bare `YYYY-MM-DDTHH:MM(:SS)` is interpreted in the supplied offset.
    pub fn resolve_event_time(&self, offset: chrono::FixedOffset) -> Option<i64> {
        let raw = self.event_time.as_deref()?.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
            return None;
        }
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
            return Some(dt.timestamp());
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
                return naive.and_local_timezone(offset).single().map(|dt| dt.timestamp());
            }
        }
        None
    }
}

fn join_string_or_array(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(","),
        _ => String::new(),
    }
}

/// What an action message asks to do with an existing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Complete,
    Cancel,
    Ignore,
    Postpone,
    Modify,
    #[default]
    None,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::Ignore => "ignore",
            Self::Postpone => "postpone",
            Self::Modify => "modify",
            Self::None => "none",
        }
    }

    pub fn parse_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "complete" | "done" => Self::Complete,
            "cancel" => Self::Cancel,
            "ignore" => Self::Ignore,
            "postpone" | "snooze" => Self::Postpone,
            "modify" | "update" => Self::Modify,
            _ => Self::None,
        }
    }
}

/// Decision returned by action detection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionDecision {
    #[serde(default)]
    pub action: ActionKind,
    #[serde(default)]
    pub target_event_id: Option<i64>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// Snooze duration for postpone actions, in minutes.
    #[serde(default = "default_snooze_minutes")]
    pub snooze_minutes: i64,
    /// Proposed field changes for modify actions.
    #[serde(default)]
    pub changes: Option<serde_json::Value>,
}

fn default_snooze_minutes() -> i64 {
    30
}

impl ActionDecision {
    pub fn none() -> Self {
        Self {
            action: ActionKind::None,
            target_event_id: None,
            confidence: 0.0,
            snooze_minutes: default_snooze_minutes(),
            changes: None,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != ActionKind::None && self.target_event_id.is_some()
    }
}

/// Verdict from relevance validation during context matching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelevanceVerdict {
    #[serde(default)]
    pub relevant_indices: Vec<usize>,
    #[serde(default)]
    pub confidence: f32,
}

/// Compact candidate shape handed to action detection (and its prompt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: i64,
    pub title: String,
    pub event_type: String,
    pub keywords: String,
}

impl EventSummary {
    pub fn from_event(event: &Event) -> Self {
        Self {
            id: event.id,
            title: event.title.clone(),
            event_type: event.event_type.as_str().to_string(),
            keywords: event.keywords.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_keywords_accept_both_shapes() {
        let p: EventProposal =
            serde_json::from_str(r#"{"title": "t", "keywords": "a,b"}"#).unwrap();
        assert_eq!(p.keywords_string(), "a,b");

        let p: EventProposal =
            serde_json::from_str(r#"{"title": "t", "keywords": ["a", "b"]}"#).unwrap();
        assert_eq!(p.keywords_string(), "a,b");

        let p: EventProposal = serde_json::from_str(r#"{"title": "t"}"#).unwrap();
        assert_eq!(p.keywords_string(), "");
    }

    #[test]
    fn test_proposal_event_time_resolution() {
        let offset = chrono::FixedOffset::east_opt(19_800).unwrap(); // +05:30
        let mut p = EventProposal {
            title: "t".into(),
            event_time: Some("2026-08-03T17:00:00+05:30".into()),
            ..Default::default()
        };
        // 2026-08-03T17:00:00+05:30 == 2026-08-03T11:30:00Z
        let ts = p.resolve_event_time(offset).unwrap();
        assert_eq!(ts, 1_785_756_600);

        // Bare local datetime uses the supplied offset.
        p.event_time = Some("2026-08-03T17:00".into());
        assert_eq!(p.resolve_event_time(offset), Some(ts));

        p.event_time = Some("null".into());
        assert_eq!(p.resolve_event_time(offset), None);
        p.event_time = None;
        assert_eq!(p.resolve_event_time(offset), None);
    }

    #[test]
    fn test_action_decision_defaults() {
        let d: ActionDecision = serde_json::from_str(r#"{"action": "complete"}"#).unwrap();
        assert_eq!(d.action, ActionKind::Complete);
        assert_eq!(d.snooze_minutes, 30);
        assert!(!d.is_actionable()); // no target

        let d: ActionDecision =
            serde_json::from_str(r#"{"action": "postpone", "target_event_id": 4}"#).unwrap();
        assert!(d.is_actionable());
    }
}

//! Tier-1 operations: prompt assembly + LLM call + lenient parse.
//!
//! A well-formed-but-empty model response is a success (no events found);
//! only transport/HTTP failures propagate so the tier orchestrator can
//! degrade. Unparseable output degrades to the empty result the same way the
//! heuristics would.

use crate::llm::LlmClient;
use crate::parse;
use crate::{ActionDecision, EventProposal, EventSummary, RelevanceVerdict};
use anyhow::Result;
use argus_core::{Event, PopupBlueprint, PopupType, StoredMessage};
use chrono::{DateTime, FixedOffset};

/// Per-call budget for popup blueprint generation.
const BLUEPRINT_DEADLINE_MS: u64 = 5_000;

pub async fn analyze_llm(
    llm: &dyn LlmClient,
    message: &str,
    sender_name: Option<&str>,
    context: &[StoredMessage],
    candidates: &[EventSummary],
    now: DateTime<FixedOffset>,
) -> Result<Vec<EventProposal>> {
    let mut user = String::new();
    user.push_str(&format!("Now: {}\n", now.to_rfc3339()));
    if let Some(sender) = sender_name {
        user.push_str(&format!("Sender: {}\n", sender));
    }
    if !context.is_empty() {
        user.push_str("Recent messages in this chat (oldest first):\n");
        for msg in context.iter().rev() {
            user.push_str(&format!("- {}: {}\n", msg.sender, msg.content));
        }
    }
    if !candidates.is_empty() {
        user.push_str("Existing active events:\n");
        for c in candidates {
            user.push_str(&format!(
                "- id={} [{}] {} ({})\n",
                c.id, c.event_type, c.title, c.keywords
            ));
        }
    }
    user.push_str(&format!("\nMessage: {}", message));

    let response = llm.complete(crate::prompts::ANALYZE_SYSTEM_PROMPT, &user).await?;
    Ok(parse::parse_proposals(&response))
}

pub async fn detect_action_llm(
    llm: &dyn LlmClient,
    message: &str,
    candidates: &[EventSummary],
) -> Result<ActionDecision> {
    let mut user = String::from("Candidate events:\n");
    for c in candidates {
        user.push_str(&format!(
            "- id={} [{}] {} ({})\n",
            c.id, c.event_type, c.title, c.keywords
        ));
    }
    user.push_str(&format!("\nMessage: {}", message));

    let response = llm.complete(crate::prompts::ACTION_SYSTEM_PROMPT, &user).await?;
    Ok(parse::parse_action(&response).unwrap_or_else(ActionDecision::none))
}

pub async fn validate_relevance_llm(
    llm: &dyn LlmClient,
    url_keywords: &[String],
    events: &[Event],
) -> Result<RelevanceVerdict> {
    let mut user = format!("Page keywords: {}\n\nCandidate events:\n", url_keywords.join(", "));
    for (i, event) in events.iter().enumerate() {
        user.push_str(&format!(
            "{}. [{}] {} — keywords: {}; location: {}\n",
            i,
            event.event_type.as_str(),
            event.title,
            event.keywords,
            event.location.as_deref().unwrap_or("-"),
        ));
    }

    let response = llm
        .complete(crate::prompts::RELEVANCE_SYSTEM_PROMPT, &user)
        .await?;
    Ok(parse::parse_relevance(&response).unwrap_or_default())
}

pub async fn chat_llm(
    llm: &dyn LlmClient,
    query: &str,
    history: &[(String, String)],
    events: &[Event],
) -> Result<String> {
    let mut user = String::from("Saved events:\n");
    for event in events {
        let when = event
            .event_time
            .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "no time".to_string());
        user.push_str(&format!(
            "- [{}] {} ({}) at {}\n",
            event.event_type.as_str(),
            event.title,
            event.keywords,
            when
        ));
    }
    if !history.is_empty() {
        user.push_str("\nConversation so far:\n");
        for (role, content) in history {
            user.push_str(&format!("{}: {}\n", role, content));
        }
    }
    user.push_str(&format!("\nQuestion: {}", query));

    llm.complete(crate::prompts::CHAT_SYSTEM_PROMPT, &user).await
}

/// Generate a popup blueprint within a 5-second budget. Invalid or late
/// output is an error; callers fall back to the static template.
pub async fn blueprint_llm(
    llm: &dyn LlmClient,
    event: &Event,
    popup_type: PopupType,
) -> Result<PopupBlueprint> {
    let user = format!(
        "popupType: {}\nEvent: [{}] {}\nDetails: {}\nLocation: {}\n",
        popup_type.as_str(),
        event.event_type.as_str(),
        event.title,
        event.description.as_deref().unwrap_or("-"),
        event.location.as_deref().unwrap_or("-"),
    );

    let response = argus_core::with_deadline(
        BLUEPRINT_DEADLINE_MS,
        llm.complete(crate::prompts::BLUEPRINT_SYSTEM_PROMPT, &user),
    )
    .await?;

    let blueprint = parse::parse_blueprint(&response)
        .ok_or_else(|| anyhow::anyhow!("model returned an unusable popup blueprint"))?;
    if blueprint.popup_type != popup_type {
        anyhow::bail!(
            "model changed popupType from {} to {}",
            popup_type.as_str(),
            blueprint.popup_type.as_str()
        );
    }
    Ok(blueprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockLlm;
    use argus_core::{EventStatus, EventType};
    use chrono::TimeZone;

    fn sample_event() -> Event {
        Event {
            id: 1,
            message_id: None,
            event_type: EventType::Meeting,
            title: "Dinner with Sam".into(),
            description: None,
            location: None,
            keywords: "dinner,sam".into(),
            participants: None,
            event_time: None,
            reminder_time: None,
            embedding: None,
            context_url: None,
            status: EventStatus::Discovered,
            dismiss_count: 0,
            sender_name: None,
            confidence: 0.9,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_analyze_llm_parses_response() {
        let mock = MockLlm::new();
        mock.queue_completion(
            r#"{"events": [{"title": "Dinner", "event_type": "meeting", "confidence": 0.9}]}"#,
        );
        let now = chrono::FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2026, 8, 1, 12, 0, 0);
        let proposals = analyze_llm(&mock, "dinner tonight?", None, &[], &[], now.unwrap())
            .await
            .unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].title, "Dinner");
    }

    #[tokio::test]
    async fn test_analyze_llm_propagates_transport_errors() {
        let mock = MockLlm::new();
        mock.set_unreachable(true);
        let now = chrono::FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2026, 8, 1, 12, 0, 0);
        assert!(analyze_llm(&mock, "dinner tonight?", None, &[], &[], now.unwrap())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_blueprint_llm_rejects_type_swap() {
        let mock = MockLlm::new();
        mock.queue_completion(
            r#"{"icon": "x", "headerClass": "reminder", "title": "T", "subtitle": "s", "body": "b",
                "buttons": [{"text": "OK", "action": "acknowledge", "style": "primary"}],
                "popupType": "insight_card"}"#,
        );
        let result = blueprint_llm(&mock, &sample_event(), PopupType::EventReminder).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_blueprint_llm_accepts_valid() {
        let mock = MockLlm::new();
        mock.queue_completion(
            r#"{"icon": "⏰", "headerClass": "reminder", "title": "Dinner soon", "subtitle": "s",
                "body": "b", "buttons": [{"text": "OK", "action": "acknowledge", "style": "primary"}],
                "popupType": "event_reminder"}"#,
        );
        let blueprint = blueprint_llm(&mock, &sample_event(), PopupType::EventReminder)
            .await
            .unwrap();
        assert_eq!(blueprint.title, "Dinner soon");
    }
}

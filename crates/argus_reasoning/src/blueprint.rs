//! Popup blueprint generation with tiered fallback: LLM within a 5-second
//! budget, then the static template for the kind. The static arm can never
//! fail, so a popup always goes out.

use crate::llm::LlmClient;
use crate::ops;
use crate::tier::TierOrchestrator;
use argus_core::{Event, PopupBlueprint, PopupType};
use std::sync::Arc;

pub async fn generate_popup(
    tier: &Arc<TierOrchestrator>,
    llm: &dyn LlmClient,
    event: &Event,
    popup_type: PopupType,
) -> PopupBlueprint {
    tier.with_fallback(
        "generate_popup",
        ops::blueprint_llm(llm, event, popup_type),
        async { Ok(PopupBlueprint::static_template(popup_type)) },
        PopupBlueprint::static_template(popup_type),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockLlm;
    use argus_core::{EventStatus, EventType, TierMode};
    use std::time::Duration;

    fn sample_event() -> Event {
        Event {
            id: 9,
            message_id: None,
            event_type: EventType::Subscription,
            title: "Cancel Netflix".into(),
            description: None,
            location: None,
            keywords: "netflix".into(),
            participants: None,
            event_time: None,
            reminder_time: None,
            embedding: None,
            context_url: Some("netflix".into()),
            status: EventStatus::Discovered,
            dismiss_count: 0,
            sender_name: None,
            confidence: 0.9,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_static_template() {
        let tier = Arc::new(TierOrchestrator::new(TierMode::Auto, Duration::from_secs(30)));
        let mock = MockLlm::new();
        mock.set_unreachable(true);

        let popup = generate_popup(&tier, &mock, &sample_event(), PopupType::EventDiscovery).await;
        assert_eq!(popup.popup_type, PopupType::EventDiscovery);
        popup.validate().unwrap();
    }

    #[tokio::test]
    async fn test_uses_generated_blueprint_when_valid() {
        let tier = Arc::new(TierOrchestrator::new(TierMode::Auto, Duration::from_secs(30)));
        let mock = MockLlm::new();
        mock.queue_completion(
            r#"{"icon": "🎬", "headerClass": "discovery", "title": "Netflix chore", "subtitle": "s",
                "body": "b", "buttons": [{"text": "Remind me", "action": "set-reminder", "style": "primary"}],
                "popupType": "event_discovery"}"#,
        );
        let popup = generate_popup(&tier, &mock, &sample_event(), PopupType::EventDiscovery).await;
        assert_eq!(popup.title, "Netflix chore");
    }
}

//! UI-independent popup blueprints.
//!
//! Eight popup kinds share one record shape with kind-specific defaults.
//! LLM-generated blueprints are validated against the recognized client
//! actions before broadcast; anything invalid falls back to the static
//! template for its kind.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Button actions the browser client recognizes. Carried back to the server
/// in a subsequent HTTP POST.
pub const CLIENT_ACTIONS: [&str; 11] = [
    "set-reminder",
    "snooze",
    "ignore",
    "acknowledge",
    "done",
    "complete",
    "dismiss",
    "dismiss-temp",
    "dismiss-permanent",
    "delete",
    "view-day",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopupType {
    EventDiscovery,
    EventReminder,
    ContextReminder,
    ConflictWarning,
    InsightCard,
    SnoozeReminder,
    UpdateConfirm,
    FormMismatch,
}

impl PopupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventDiscovery => "event_discovery",
            Self::EventReminder => "event_reminder",
            Self::ContextReminder => "context_reminder",
            Self::ConflictWarning => "conflict_warning",
            Self::InsightCard => "insight_card",
            Self::SnoozeReminder => "snooze_reminder",
            Self::UpdateConfirm => "update_confirm",
            Self::FormMismatch => "form_mismatch",
        }
    }

    pub const ALL: [PopupType; 8] = [
        Self::EventDiscovery,
        Self::EventReminder,
        Self::ContextReminder,
        Self::ConflictWarning,
        Self::InsightCard,
        Self::SnoozeReminder,
        Self::UpdateConfirm,
        Self::FormMismatch,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderClass {
    Discovery,
    Reminder,
    Context,
    Conflict,
    Insight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopupButton {
    pub text: String,
    pub action: String,
    pub style: String,
}

impl PopupButton {
    fn new(text: &str, action: &str, style: &str) -> Self {
        Self {
            text: text.to_string(),
            action: action.to_string(),
            style: style.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopupBlueprint {
    pub icon: String,
    #[serde(rename = "headerClass")]
    pub header_class: HeaderClass,
    pub title: String,
    pub subtitle: String,
    pub body: String,
    #[serde(default)]
    pub question: Option<String>,
    pub buttons: Vec<PopupButton>,
    #[serde(rename = "popupType")]
    pub popup_type: PopupType,
}

impl PopupBlueprint {
    /// The static template for a popup kind. These are the T3-safe defaults:
    /// they must cover every kind and never fail.
    pub fn static_template(popup_type: PopupType) -> Self {
        match popup_type {
            PopupType::EventDiscovery => Self {
                icon: "✨".into(),
                header_class: HeaderClass::Discovery,
                title: "New event spotted".into(),
                subtitle: "Found in your chats".into(),
                body: "I noticed something that looks worth remembering.".into(),
                question: Some("Want a reminder for this?".into()),
                buttons: vec![
                    PopupButton::new("Remind me", "set-reminder", "primary"),
                    PopupButton::new("Later", "snooze", "secondary"),
                    PopupButton::new("Ignore", "ignore", "ghost"),
                ],
                popup_type,
            },
            PopupType::EventReminder => Self {
                icon: "⏰".into(),
                header_class: HeaderClass::Reminder,
                title: "Reminder".into(),
                subtitle: "Coming up".into(),
                body: "This event is coming up soon.".into(),
                question: None,
                buttons: vec![
                    PopupButton::new("Got it", "acknowledge", "primary"),
                    PopupButton::new("Done", "complete", "secondary"),
                    PopupButton::new("Snooze", "snooze", "ghost"),
                ],
                popup_type,
            },
            PopupType::ContextReminder => Self {
                icon: "📍".into(),
                header_class: HeaderClass::Context,
                title: "While you're here".into(),
                subtitle: "Related to this page".into(),
                body: "You saved something relevant to this site.".into(),
                question: None,
                buttons: vec![
                    PopupButton::new("Thanks", "acknowledge", "primary"),
                    PopupButton::new("Done", "complete", "secondary"),
                    PopupButton::new("Not now", "dismiss-temp", "ghost"),
                ],
                popup_type,
            },
            PopupType::ConflictWarning => Self {
                icon: "⚠️".into(),
                header_class: HeaderClass::Conflict,
                title: "Schedule clash".into(),
                subtitle: "Two events overlap".into(),
                body: "This event lands within an hour of something else on your plate.".into(),
                question: Some("Keep both?".into()),
                buttons: vec![
                    PopupButton::new("Keep it", "acknowledge", "primary"),
                    PopupButton::new("View day", "view-day", "secondary"),
                    PopupButton::new("Ignore", "ignore", "ghost"),
                ],
                popup_type,
            },
            PopupType::InsightCard => Self {
                icon: "💡".into(),
                header_class: HeaderClass::Insight,
                title: "Heads up".into(),
                subtitle: "Something you might want to know".into(),
                body: "A pattern in your events looked worth surfacing.".into(),
                question: None,
                buttons: vec![
                    PopupButton::new("Thanks", "acknowledge", "primary"),
                    PopupButton::new("Dismiss", "dismiss", "ghost"),
                ],
                popup_type,
            },
            PopupType::SnoozeReminder => Self {
                icon: "😴".into(),
                header_class: HeaderClass::Reminder,
                title: "Snooze over".into(),
                subtitle: "You asked me to bring this back".into(),
                body: "This one is back from snooze.".into(),
                question: Some("Ready to deal with it?".into()),
                buttons: vec![
                    PopupButton::new("Done", "complete", "primary"),
                    PopupButton::new("Snooze again", "snooze", "secondary"),
                    PopupButton::new("Ignore", "ignore", "ghost"),
                ],
                popup_type,
            },
            PopupType::UpdateConfirm => Self {
                icon: "✏️".into(),
                header_class: HeaderClass::Discovery,
                title: "Update this event?".into(),
                subtitle: "A message looked like a change".into(),
                body: "A recent message seems to modify a saved event.".into(),
                question: Some("Apply the change?".into()),
                buttons: vec![
                    PopupButton::new("Apply", "acknowledge", "primary"),
                    PopupButton::new("Keep as is", "dismiss", "ghost"),
                ],
                popup_type,
            },
            PopupType::FormMismatch => Self {
                icon: "📝".into(),
                header_class: HeaderClass::Context,
                title: "Double-check that field".into(),
                subtitle: "Differs from what you told me".into(),
                body: "What you typed doesn't match what I have remembered.".into(),
                question: Some("Use the remembered value?".into()),
                buttons: vec![
                    PopupButton::new("Thanks", "acknowledge", "primary"),
                    PopupButton::new("Dismiss", "dismiss", "ghost"),
                ],
                popup_type,
            },
        }
    }

    /// Validate a generated blueprint before broadcast. Rejects empty titles,
    /// button-less popups, and unrecognized button actions.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            bail!("popup blueprint has an empty title");
        }
        if self.buttons.is_empty() {
            bail!("popup blueprint has no buttons");
        }
        for button in &self.buttons {
            if !CLIENT_ACTIONS.contains(&button.action.as_str()) {
                bail!("unrecognized button action '{}'", button.action);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_valid_static_template() {
        for kind in PopupType::ALL {
            let blueprint = PopupBlueprint::static_template(kind);
            assert_eq!(blueprint.popup_type, kind);
            blueprint.validate().unwrap();
        }
    }

    #[test]
    fn test_validate_rejects_unknown_action() {
        let mut blueprint = PopupBlueprint::static_template(PopupType::EventDiscovery);
        blueprint.buttons[0].action = "explode".into();
        assert!(blueprint.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_title() {
        let mut blueprint = PopupBlueprint::static_template(PopupType::InsightCard);
        blueprint.title = "  ".into();
        assert!(blueprint.validate().is_err());
    }

    #[test]
    fn test_serde_field_names_match_client_contract() {
        let blueprint = PopupBlueprint::static_template(PopupType::ConflictWarning);
        let json = serde_json::to_value(&blueprint).unwrap();
        assert_eq!(json["popupType"], "conflict_warning");
        assert_eq!(json["headerClass"], "conflict");
        assert!(json["buttons"].as_array().unwrap().len() >= 2);
    }

    #[test]
    fn test_deserialize_generated_blueprint() {
        let json = r#"{
            "icon": "🎬",
            "headerClass": "discovery",
            "title": "Netflix plan",
            "subtitle": "From your chat",
            "body": "You wanted to cancel Netflix after the show.",
            "question": "Remind you?",
            "buttons": [{"text": "Yes", "action": "set-reminder", "style": "primary"}],
            "popupType": "event_discovery"
        }"#;
        let blueprint: PopupBlueprint = serde_json::from_str(json).unwrap();
        blueprint.validate().unwrap();
        assert_eq!(blueprint.popup_type, PopupType::EventDiscovery);
    }
}

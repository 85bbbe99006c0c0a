//! Tier-2 deterministic fallbacks. Pure functions, no I/O; callers pass the
//! clock in so behavior is reproducible.

use crate::{ActionDecision, ActionKind, EventProposal, EventSummary, RelevanceVerdict};
use argus_core::Event;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Weekday};

/// Heuristic extraction never claims more certainty than this.
const MAX_ANALYZE_CONFIDENCE: f32 = 0.95;

/// Relevance validation without an LLM caps out lower still.
const MAX_RELEVANCE_CONFIDENCE: f32 = 0.6;

/// Subscription services recognized in message text (also feed context-URL
/// derivation in the pipeline).
pub const KNOWN_SERVICES: [&str; 16] = [
    "netflix",
    "spotify",
    "prime",
    "hotstar",
    "disney",
    "youtube",
    "zomato",
    "swiggy",
    "uber",
    "ola",
    "makemytrip",
    "airbnb",
    "jio",
    "airtel",
    "gym",
    "icloud",
];

const GREETING_TOKENS: [&str; 16] = [
    "hi", "hello", "hey", "yo", "ok", "okay", "thanks", "thank", "you", "good", "morning",
    "night", "gm", "gn", "hmm", "haha",
];

const STOPWORDS: [&str; 26] = [
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "am", "are", "was", "were", "be", "i", "my", "me", "we", "this", "that",
];

/// Lowercased alphanumeric tokens, stopwords removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2 && !STOPWORDS.contains(t))
        .map(String::from)
        .collect()
}

fn is_pure_greeting(text: &str) -> bool {
    let tokens: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    !tokens.is_empty() && tokens.iter().all(|t| GREETING_TOKENS.contains(&t.as_str()))
}

/// Quick filter run before any AI-backed step: obvious noise that never
/// deserves extraction (too short, pure greeting).
pub fn is_noise(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.chars().count() < 5 || is_pure_greeting(trimmed)
}

fn contains_action_verb(text: &str) -> bool {
    let re = regex::Regex::new(
        r"(?i)\b(cancel(?:led|ed)?|done|finished|completed|ho gaya|hogaya|remind me|postpone|already)\b",
    )
    .unwrap();
    re.is_match(text)
}

// ============================================================================
// Analyze (event extraction)
// ============================================================================

/// Extract zero or one event from a message. Short-circuits on noise
/// (length < 5, pure greetings) and on action messages, which belong to
/// `detect_action` instead.
pub fn analyze_message(
    text: &str,
    _sender_name: Option<&str>,
    now: DateTime<FixedOffset>,
) -> Option<EventProposal> {
    let trimmed = text.trim();
    if trimmed.chars().count() < 5 || is_pure_greeting(trimmed) || contains_action_verb(trimmed) {
        return None;
    }

    let lower = trimmed.to_lowercase();
    let service = KNOWN_SERVICES.iter().find(|s| lower.contains(*s)).copied();

    let meeting_re =
        regex::Regex::new(r"(?i)\b(meet|meeting|call|dinner|lunch|interview|catch up)\b").unwrap();
    let task_re = regex::Regex::new(
        r"(?i)\b(need to|have to|remember to|don't forget|dont forget)\b",
    )
    .unwrap();
    let travel_re = regex::Regex::new(r"(?i)\b(flight|trip|travel|train|hotel)\b").unwrap();
    let recommend_re = regex::Regex::new(r"(?i)\b(try|recommend|check out|must see)\b").unwrap();

    let event_type = if service.is_some() {
        "subscription"
    } else if meeting_re.is_match(&lower) {
        "meeting"
    } else if task_re.is_match(&lower) {
        "task"
    } else if travel_re.is_match(&lower) {
        "travel"
    } else if recommend_re.is_match(&lower) {
        "recommendation"
    } else {
        "other"
    };

    let event_time = resolve_datetime(&lower, now);
    let location = extract_location(trimmed);

    let mut keywords: Vec<String> = tokenize(trimmed);
    keywords.dedup();
    keywords.truncate(6);

    let mut confidence: f32 = 0.6;
    if event_time.is_some() {
        confidence += 0.15;
    }
    if event_type != "other" {
        confidence += 0.1;
    }

    Some(EventProposal {
        event_type: event_type.to_string(),
        title: derive_title(trimmed),
        description: Some(trimmed.to_string()),
        event_time: event_time.map(|dt| dt.to_rfc3339()),
        location,
        participants: serde_json::Value::Null,
        keywords: serde_json::Value::String(keywords.join(",")),
        confidence: confidence.min(MAX_ANALYZE_CONFIDENCE),
        event_action: None,
        target_event_id: None,
    })
}

fn derive_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut title = words
        .iter()
        .take(8)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if title.len() > 60 {
        let cut = title
            .char_indices()
            .take_while(|(i, _)| *i < 60)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(60);
        title.truncate(cut);
    }
    title
}

/// Resolve a relative or explicit time mention against `now`.
///
/// tomorrow|kal → +1 day 10:00; today|aaj → today 10:00; next week → +7 days;
/// an English weekday name → its next occurrence; an explicit `HH(:MM) am|pm`
/// or `HH:MM` overrides the default hour and rolls to tomorrow when past.
pub fn resolve_datetime(
    lower: &str,
    now: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    let today = now.date_naive();

    let date: Option<NaiveDate> = if lower.contains("tomorrow") || has_word(lower, "kal") {
        today.succ_opt()
    } else if lower.contains("today") || has_word(lower, "aaj") {
        Some(today)
    } else if lower.contains("next week") {
        today.checked_add_days(chrono::Days::new(7))
    } else {
        next_weekday(lower, today)
    };

    let time = extract_time_of_day(lower);

    match (date, time) {
        (Some(date), Some((hour, minute))) => at_local(now, date, hour, minute),
        (Some(date), None) => at_local(now, date, 10, 0),
        (None, Some((hour, minute))) => {
            let candidate = at_local(now, today, hour, minute)?;
            if candidate <= now {
                at_local(now, today.succ_opt()?, hour, minute)
            } else {
                Some(candidate)
            }
        }
        (None, None) => None,
    }
}

fn has_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric()).any(|t| t == word)
}

fn next_weekday(lower: &str, today: NaiveDate) -> Option<NaiveDate> {
    let names: [(&str, Weekday); 7] = [
        ("monday", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("saturday", Weekday::Sat),
        ("sunday", Weekday::Sun),
    ];
    let (_, target) = names.iter().find(|(name, _)| lower.contains(name))?;
    let mut days_ahead = (target.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    if days_ahead == 0 {
        days_ahead = 7;
    }
    today.checked_add_days(chrono::Days::new(days_ahead as u64))
}

fn extract_time_of_day(lower: &str) -> Option<(u32, u32)> {
    let ampm_re = regex::Regex::new(r"\b(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b").unwrap();
    if let Some(caps) = ampm_re.captures(lower) {
        let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(2).map_or(0, |m| m.as_str().parse().unwrap_or(0));
        if hour > 12 || minute > 59 {
            return None;
        }
        let meridiem = caps.get(3)?.as_str();
        if meridiem == "pm" && hour != 12 {
            hour += 12;
        }
        if meridiem == "am" && hour == 12 {
            hour = 0;
        }
        return Some((hour, minute));
    }

    let clock_re = regex::Regex::new(r"\b(\d{1,2}):(\d{2})\b").unwrap();
    if let Some(caps) = clock_re.captures(lower) {
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(2)?.as_str().parse().ok()?;
        if hour <= 23 && minute <= 59 {
            return Some((hour, minute));
        }
    }
    None
}

fn at_local(
    now: DateTime<FixedOffset>,
    date: NaiveDate,
    hour: u32,
    minute: u32,
) -> Option<DateTime<FixedOffset>> {
    date.and_hms_opt(hour, minute, 0)?
        .and_local_timezone(*now.offset())
        .single()
}

/// `in <X>` / `at <X>` with a 3–29 character place name.
fn extract_location(text: &str) -> Option<String> {
    let re = regex::Regex::new(r"(?i)\b(?:in|at)\s+([A-Za-z][A-Za-z ]{1,27}[A-Za-z])").unwrap();
    let caps = re.captures(text)?;
    let place = caps.get(1)?.as_str().trim().to_string();
    if (3..=29).contains(&place.len()) {
        Some(place)
    } else {
        None
    }
}

// ============================================================================
// Detect action
// ============================================================================

/// Match an action message against the caller-supplied candidate events.
/// The target is the candidate with the highest token overlap against
/// `title + keywords`; no overlap means no action.
pub fn detect_action(text: &str, candidates: &[EventSummary]) -> ActionDecision {
    let lower = text.to_lowercase();

    let complete_re = regex::Regex::new(
        r"(?i)\b(done|finished|completed|ho gaya|hogaya|already)\b",
    )
    .unwrap();
    let cancel_re = regex::Regex::new(r"(?i)\bcancel(?:led|ed)?\b").unwrap();
    let ignore_re = regex::Regex::new(
        r"(?i)\b(ignore|stop reminding|leave it|rehne do|forget it)\b",
    )
    .unwrap();
    let postpone_re = regex::Regex::new(
        r"(?i)\b(postpone|later|delay|not now|next week|remind me tomorrow)\b",
    )
    .unwrap();

    let action = if complete_re.is_match(&lower) {
        ActionKind::Complete
    } else if cancel_re.is_match(&lower) {
        ActionKind::Cancel
    } else if ignore_re.is_match(&lower) {
        ActionKind::Ignore
    } else if postpone_re.is_match(&lower) {
        ActionKind::Postpone
    } else {
        return ActionDecision::none();
    };

    let message_tokens = tokenize(&lower);
    let mut best: Option<(i64, usize)> = None;
    for candidate in candidates {
        let haystack = format!("{} {}", candidate.title, candidate.keywords);
        let candidate_tokens = tokenize(&haystack);
        let overlap = message_tokens
            .iter()
            .filter(|t| candidate_tokens.contains(t))
            .count();
        if overlap > 0 && best.map_or(true, |(_, n)| overlap > n) {
            best = Some((candidate.id, overlap));
        }
    }

    let Some((target_id, overlap)) = best else {
        return ActionDecision::none();
    };

    let snooze_minutes = if lower.contains("next week") {
        10_080
    } else if lower.contains("tomorrow") || has_word(&lower, "kal") {
        1_440
    } else {
        30
    };

    ActionDecision {
        action,
        target_event_id: Some(target_id),
        confidence: (0.5 + 0.15 * overlap as f32).min(0.9),
        snooze_minutes,
        changes: None,
    }
}

// ============================================================================
// Validate relevance
// ============================================================================

/// Keep the candidate events whose text overlaps the URL-derived keywords by
/// at least 30% or two tokens. Confidence is capped at 0.6.
pub fn validate_relevance(url_keywords: &[String], events: &[Event]) -> RelevanceVerdict {
    if url_keywords.is_empty() {
        return RelevanceVerdict::default();
    }
    let mut relevant_indices = Vec::new();
    let mut max_overlap = 0usize;

    for (i, event) in events.iter().enumerate() {
        let haystack = format!(
            "{} {} {} {}",
            event.title,
            event.keywords,
            event.location.as_deref().unwrap_or(""),
            event.description.as_deref().unwrap_or(""),
        );
        let event_tokens = tokenize(&haystack);
        let overlap = url_keywords
            .iter()
            .filter(|k| event_tokens.contains(&k.to_lowercase()))
            .count();
        let ratio = overlap as f32 / url_keywords.len() as f32;
        if overlap >= 2 || ratio >= 0.3 {
            relevant_indices.push(i);
            max_overlap = max_overlap.max(overlap);
        }
    }

    let confidence = if relevant_indices.is_empty() {
        0.0
    } else {
        (0.2 + 0.1 * max_overlap as f32).min(MAX_RELEVANCE_CONFIDENCE)
    };

    RelevanceVerdict {
        relevant_indices,
        confidence,
    }
}

// ============================================================================
// Chat
// ============================================================================

/// Token-overlap answer over the user's events, with a today / this-week
/// filter fallback when nothing matches the query directly.
pub fn chat_answer(
    query: &str,
    events: &[Event],
    now: DateTime<FixedOffset>,
) -> (String, Vec<i64>) {
    let query_tokens = tokenize(query);
    let mut scored: Vec<(&Event, usize)> = events
        .iter()
        .map(|event| {
            let haystack = format!("{} {}", event.title, event.keywords);
            let event_tokens = tokenize(&haystack);
            let overlap = query_tokens
                .iter()
                .filter(|t| event_tokens.contains(t))
                .count();
            (event, overlap)
        })
        .filter(|(_, n)| *n > 0)
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    let mut matched: Vec<&Event> = scored.into_iter().take(5).map(|(e, _)| e).collect();

    if matched.is_empty() {
        let lower = query.to_lowercase();
        let window_secs = if lower.contains("this week") {
            Some(7 * 86_400)
        } else if lower.contains("today") {
            Some(86_400)
        } else {
            None
        };
        if let Some(window) = window_secs {
            let now_ts = now.timestamp();
            matched = events
                .iter()
                .filter(|e| {
                    e.event_time
                        .map(|t| t >= now_ts && t <= now_ts + window)
                        .unwrap_or(false)
                })
                .take(5)
                .collect();
        }
    }

    if matched.is_empty() {
        return (
            "I couldn't find anything matching that in your events.".to_string(),
            Vec::new(),
        );
    }

    let mut lines = vec!["Here's what I found:".to_string()];
    for event in &matched {
        let when = event
            .event_time
            .and_then(|t| {
                chrono::DateTime::from_timestamp(t, 0)
                    .map(|dt| dt.with_timezone(now.offset()).format("%a %d %b, %H:%M").to_string())
            })
            .unwrap_or_else(|| "no time set".to_string());
        lines.push(format!("• {} — {}", event.title, when));
    }
    (lines.join("\n"), matched.iter().map(|e| e.id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::{EventStatus, EventType};
    use chrono::{TimeZone, Timelike};

    fn reference_now() -> DateTime<FixedOffset> {
        // Saturday 2026-08-01 12:00 +05:30
        FixedOffset::east_opt(19_800)
            .unwrap()
            .with_ymd_and_hms(2026, 8, 1, 12, 0, 0)
            .unwrap()
    }

    fn summary(id: i64, title: &str, keywords: &str) -> EventSummary {
        EventSummary {
            id,
            title: title.into(),
            event_type: "task".into(),
            keywords: keywords.into(),
        }
    }

    fn event(id: i64, title: &str, keywords: &str) -> Event {
        Event {
            id,
            message_id: None,
            event_type: EventType::Task,
            title: title.into(),
            description: None,
            location: None,
            keywords: keywords.into(),
            participants: None,
            event_time: None,
            reminder_time: None,
            embedding: None,
            context_url: None,
            status: EventStatus::Discovered,
            dismiss_count: 0,
            sender_name: None,
            confidence: 0.8,
            created_at: 0,
        }
    }

    #[test]
    fn test_analyze_short_circuits() {
        let now = reference_now();
        assert!(analyze_message("ok", None, now).is_none());
        assert!(analyze_message("hi", None, now).is_none());
        assert!(analyze_message("good morning", None, now).is_none());
        assert!(analyze_message("already cancelled netflix", None, now).is_none());
        assert!(analyze_message("ho gaya bhai", None, now).is_none());
    }

    #[test]
    fn test_analyze_meeting_tomorrow_at_5pm() {
        let now = reference_now();
        let proposal = analyze_message("lets meet tomorrow at 5pm", None, now).unwrap();
        assert_eq!(proposal.event_type, "meeting");
        assert!(proposal.confidence <= 0.95);

        let ts = proposal.resolve_event_time(*now.offset()).unwrap();
        let expected = FixedOffset::east_opt(19_800)
            .unwrap()
            .with_ymd_and_hms(2026, 8, 2, 17, 0, 0)
            .unwrap()
            .timestamp();
        assert_eq!(ts, expected);
    }

    #[test]
    fn test_analyze_subscription_service() {
        let now = reference_now();
        let proposal = analyze_message(
            "I should downgrade my Netflix plan after this show",
            None,
            now,
        )
        .unwrap();
        assert_eq!(proposal.event_type, "subscription");
        assert!(proposal.keywords_string().contains("netflix"));
    }

    #[test]
    fn test_analyze_no_time_yields_null_event_time() {
        let now = reference_now();
        let proposal = analyze_message(
            "Bro you should definitely try the cashews at Zantyes shop when you go to Goa",
            Some("Rahul"),
            now,
        )
        .unwrap();
        assert!(proposal.event_time.is_none());
        assert!(proposal.keywords_string().contains("goa"));
    }

    #[test]
    fn test_resolve_today_and_kal() {
        let now = reference_now();
        let today_10 = resolve_datetime("chore aaj karna hai", now).unwrap();
        assert_eq!(today_10.date_naive(), now.date_naive());
        assert_eq!((today_10.hour(), today_10.minute()), (10, 0));

        let kal = resolve_datetime("kal submit karna hai", now).unwrap();
        assert_eq!(kal.date_naive(), now.date_naive().succ_opt().unwrap());
    }

    #[test]
    fn test_resolve_next_week_and_weekday() {
        let now = reference_now(); // Saturday
        let next_week = resolve_datetime("lets do it next week", now).unwrap();
        assert_eq!(
            next_week.date_naive(),
            now.date_naive().checked_add_days(chrono::Days::new(7)).unwrap()
        );

        // Next Monday from Saturday 2026-08-01 is 2026-08-03.
        let monday = resolve_datetime("submit the report on monday", now).unwrap();
        assert_eq!(
            monday.date_naive(),
            NaiveDate::from_ymd_opt(2026, 8, 3).unwrap()
        );

        // "saturday" on a Saturday means next Saturday, not today.
        let saturday = resolve_datetime("party on saturday", now).unwrap();
        assert_eq!(
            saturday.date_naive(),
            NaiveDate::from_ymd_opt(2026, 8, 8).unwrap()
        );
    }

    #[test]
    fn test_bare_time_rolls_to_tomorrow_when_past() {
        let now = reference_now(); // 12:00
        let past = resolve_datetime("call him at 9am", now).unwrap();
        assert_eq!(past.date_naive(), now.date_naive().succ_opt().unwrap());
        assert_eq!(past.hour(), 9);

        let future = resolve_datetime("call him at 6pm", now).unwrap();
        assert_eq!(future.date_naive(), now.date_naive());
        assert_eq!(future.hour(), 18);
    }

    #[test]
    fn test_twelve_hour_edges() {
        assert_eq!(extract_time_of_day("at 12 pm"), Some((12, 0)));
        assert_eq!(extract_time_of_day("at 12am"), Some((0, 0)));
        assert_eq!(extract_time_of_day("at 5:45pm"), Some((17, 45)));
        assert_eq!(extract_time_of_day("at 18:30"), Some((18, 30)));
        assert_eq!(extract_time_of_day("nothing here"), None);
    }

    #[test]
    fn test_location_extraction_bounds() {
        assert_eq!(
            extract_location("dinner in Bandra West tonight"),
            Some("Bandra West tonight".to_string())
        );
        assert!(extract_location("meet at X").is_none()); // too short
    }

    #[test]
    fn test_detect_action_complete_netflix() {
        let candidates = vec![
            summary(1, "Cancel Netflix subscription", "netflix,subscription"),
            summary(2, "Dentist appointment", "dentist,health"),
        ];
        let decision = detect_action("already cancelled netflix", &candidates);
        assert_eq!(decision.action, ActionKind::Complete);
        assert_eq!(decision.target_event_id, Some(1));
        assert!(decision.confidence > 0.0);
    }

    #[test]
    fn test_detect_action_requires_overlap() {
        let candidates = vec![summary(1, "Dentist appointment", "dentist")];
        let decision = detect_action("done with the groceries", &candidates);
        assert_eq!(decision.action, ActionKind::None);
        assert!(decision.target_event_id.is_none());
    }

    #[test]
    fn test_detect_action_snooze_durations() {
        let candidates = vec![summary(1, "Pay electricity bill", "electricity,bill")];
        let next_week = detect_action("postpone the electricity bill to next week", &candidates);
        assert_eq!(next_week.action, ActionKind::Postpone);
        assert_eq!(next_week.snooze_minutes, 10_080);

        let tomorrow = detect_action("electricity bill later, remind me tomorrow", &candidates);
        assert_eq!(tomorrow.snooze_minutes, 1_440);

        let soon = detect_action("not now, electricity bill later", &candidates);
        assert_eq!(soon.snooze_minutes, 30);
    }

    #[test]
    fn test_detect_action_none_for_plain_text() {
        let candidates = vec![summary(1, "Book flights", "flight")];
        let decision = detect_action("what a lovely day", &candidates);
        assert_eq!(decision.action, ActionKind::None);
    }

    #[test]
    fn test_validate_relevance_thresholds() {
        let events = vec![
            event(1, "Trip to Goa", "goa,travel,beach"),
            event(2, "Buy groceries", "shopping,food"),
        ];
        let keywords = vec!["goa".to_string(), "hotels".to_string()];
        let verdict = validate_relevance(&keywords, &events);
        // One token of two = 50% ≥ 30%.
        assert_eq!(verdict.relevant_indices, vec![0]);
        assert!(verdict.confidence <= 0.6);

        let verdict = validate_relevance(&["quantum".to_string(), "physics".to_string()], &events);
        assert!(verdict.relevant_indices.is_empty());
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn test_chat_answer_overlap_and_fallback() {
        let now = reference_now();
        let mut travel = event(1, "Trip to Goa", "goa,travel");
        travel.event_time = Some(now.timestamp() + 3_600);
        let events = vec![travel, event(2, "Pay rent", "rent")];

        let (response, ids) = chat_answer("what about my goa trip?", &events, now);
        assert!(response.contains("Trip to Goa"));
        assert_eq!(ids, vec![1]);

        // No token overlap but a today filter applies.
        let (response, ids) = chat_answer("what's on today?", &events, now);
        assert!(response.contains("Trip to Goa"));
        assert_eq!(ids, vec![1]);

        let (response, ids) = chat_answer("anything about quantum physics?", &events, now);
        assert!(response.contains("couldn't find"));
        assert!(ids.is_empty());
    }
}

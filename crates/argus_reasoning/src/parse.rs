//! Lenient parsing of LLM response text into typed payloads.
//!
//! Models wrap JSON in prose, code fences, or slightly broken syntax.
//! Strategies (tried in order):
//! 1. Direct JSON parse
//! 2. Extract JSON from a markdown code block (```json ... ```)
//! 3. Find the outermost `{...}` and parse (with repair retry)
//! 4. Find the outermost `[...]` as a bare array (with repair retry)
//! 5. Repair the full text (trailing commas, single quotes, unquoted keys)
//! 6. Graceful fallback: None / empty

use crate::{ActionDecision, EventProposal, RelevanceVerdict};
use argus_core::PopupBlueprint;
use serde_json::Value;

/// Extract the first JSON value hiding in `text`.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let code_block_re = regex::Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?\s*```").unwrap();
    if let Some(caps) = code_block_re.captures(trimmed) {
        let inner = caps.get(1).map_or("", |m| m.as_str()).trim();
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            return Some(value);
        }
        if let Ok(value) = serde_json::from_str::<Value>(&repair_json(inner)) {
            return Some(value);
        }
    }

    if let Some(json_str) = extract_balanced_braces(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&json_str) {
            return Some(value);
        }
        if let Ok(value) = serde_json::from_str::<Value>(&repair_json(&json_str)) {
            return Some(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            let arr = &trimmed[start..=end];
            if let Ok(value) = serde_json::from_str::<Value>(arr) {
                return Some(value);
            }
            if let Ok(value) = serde_json::from_str::<Value>(&repair_json(arr)) {
                return Some(value);
            }
        }
    }

    serde_json::from_str::<Value>(&repair_json(trimmed)).ok()
}

/// Parse analyzer output into proposals. Accepts `{"events": [...]}`, a bare
/// array, or a single proposal object. Garbage degrades to empty.
pub fn parse_proposals(text: &str) -> Vec<EventProposal> {
    let Some(value) = extract_json(text) else {
        tracing::debug!("could not parse proposals from: {}", head(text));
        return Vec::new();
    };

    let items: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(ref obj) => match obj.get("events").and_then(|v| v.as_array()) {
            Some(items) => items.clone(),
            None if obj.contains_key("title") => vec![value],
            None => Vec::new(),
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<EventProposal>(item).ok())
        .filter(|p| !p.title.trim().is_empty() && p.confidence > 0.0 && p.confidence <= 1.0)
        .collect()
}

/// Parse an action-detection response. Garbage degrades to None.
pub fn parse_action(text: &str) -> Option<ActionDecision> {
    let value = extract_json(text)?;
    serde_json::from_value::<ActionDecision>(value).ok()
}

/// Parse a relevance verdict: `{"relevant_indices": [...], "confidence": x}`.
pub fn parse_relevance(text: &str) -> Option<RelevanceVerdict> {
    let value = extract_json(text)?;
    serde_json::from_value::<RelevanceVerdict>(value).ok()
}

/// Parse and validate a generated popup blueprint.
pub fn parse_blueprint(text: &str) -> Option<PopupBlueprint> {
    let value = extract_json(text)?;
    let blueprint: PopupBlueprint = serde_json::from_value(value).ok()?;
    blueprint.validate().ok()?;
    Some(blueprint)
}

/// Extract the outermost balanced `{...}` substring, string-aware.
fn extract_balanced_braces(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                depth += 1;
            }
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Repair common JSON formatting issues from LLM output.
fn repair_json(text: &str) -> String {
    let mut result = text.to_string();

    // 1. Remove trailing commas before } or ]
    let trailing_comma = regex::Regex::new(r",\s*([}\]])").unwrap();
    result = trailing_comma.replace_all(&result, "$1").to_string();

    // 2. Replace single quotes with double quotes when no doubles exist
    if !result.contains('"') {
        result = result.replace('\'', "\"");
    }

    // 3. Quote unquoted keys: { key: "value" } → { "key": "value" }
    let unquoted_key = regex::Regex::new(r"(?m)\{\s*(\w+)\s*:|,\s*(\w+)\s*:").unwrap();
    result = unquoted_key
        .replace_all(&result, |caps: &regex::Captures| {
            let key = caps.get(1).or(caps.get(2)).map_or("", |m| m.as_str());
            if caps.get(0).unwrap().as_str().starts_with('{') {
                format!("{{\"{}\":", key)
            } else {
                format!(",\"{}\":", key)
            }
        })
        .to_string();

    result
}

fn head(text: &str) -> String {
    text.chars().take(200).collect()
}

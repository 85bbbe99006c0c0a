//! Duplicate suppression for freshly extracted events.
//!
//! Titles are compared after normalization (case-fold, punctuation stripped
//! including curly-quote and dash variants, whitespace collapsed). Within the
//! 48-hour window, equality or containment either way is a duplicate; short
//! titles (≤2 words on either side) require exact equality.

use argus_core::Event;

pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_duplicate_title(a: &str, b: &str) -> bool {
    let na = normalize_title(a);
    let nb = normalize_title(b);
    if na.is_empty() || nb.is_empty() {
        return false;
    }
    let words_a = na.split_whitespace().count();
    let words_b = nb.split_whitespace().count();
    if words_a <= 2 || words_b <= 2 {
        return na == nb;
    }
    na == nb || na.contains(&nb) || nb.contains(&na)
}

/// First active recent event whose title collides with `title`, if any.
/// `recent` must already be filtered to active events inside the window.
pub fn find_duplicate<'a>(title: &str, recent: &'a [Event]) -> Option<&'a Event> {
    recent
        .iter()
        .find(|event| is_duplicate_title(title, &event.title))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_quotes_and_dashes() {
        assert_eq!(normalize_title("Sam's dinner"), "sam s dinner");
        assert_eq!(normalize_title("Sam’s dinner"), "sam s dinner");
        assert_eq!(
            normalize_title("Check-in — MakeMyTrip"),
            "check in makemytrip"
        );
        assert_eq!(normalize_title("  Lots    of   SPACE "), "lots of space");
    }

    #[test]
    fn test_quote_variants_deduplicate() {
        assert!(is_duplicate_title("Sam's birthday dinner", "Sam’s birthday dinner"));
        assert!(is_duplicate_title("Re-check the visa", "Re‐check the visa"));
        assert!(is_duplicate_title("book \"the\" tickets", "book the tickets"));
    }

    #[test]
    fn test_containment_counts_as_duplicate() {
        assert!(is_duplicate_title(
            "Cancel Netflix subscription",
            "Cancel Netflix subscription after the show"
        ));
        assert!(is_duplicate_title(
            "Cancel Netflix subscription after the show",
            "Cancel Netflix subscription"
        ));
    }

    #[test]
    fn test_short_titles_require_exact_equality() {
        // "Goa trip" (2 words) is contained in the longer title, but short
        // titles only deduplicate on exact equality.
        assert!(!is_duplicate_title("Goa trip", "Goa trip with the gang"));
        assert!(is_duplicate_title("Goa trip", "goa trip"));
        assert!(!is_duplicate_title("Goa trip", "Goa plan"));
    }

    #[test]
    fn test_unrelated_titles_are_not_duplicates() {
        assert!(!is_duplicate_title("Dentist appointment on Friday", "Pay the electricity bill"));
        assert!(!is_duplicate_title("", "Pay the bill"));
    }
}

//! Context matching for URL-change checks from the client.
//!
//! Canonicalize → consult a 10-minute TTL result cache → derive keywords
//! from the URL → query the store (exact context match, then multi-field,
//! then hybrid) → validate with tiered fallback → cache with FIFO eviction.

use argus_core::Event;
use argus_reasoning::{heuristics, ops, LlmClient, RelevanceVerdict, TierOrchestrator};
use argus_store::EventStore;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

const MATCH_CACHE_TTL: Duration = Duration::from_secs(600);
const MATCH_CACHE_CAPACITY: usize = 200;

/// Tracking params stripped during canonicalization.
const TRACKING_PARAMS: [&str; 3] = ["ref", "fbclid", "gclid"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    pub events: Vec<Event>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchCacheStats {
    pub size: usize,
    pub capacity: usize,
}

struct MatchCache {
    map: HashMap<String, (MatchResult, Instant)>,
    order: VecDeque<String>,
}

impl MatchCache {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn fresh(&self, key: &str) -> Option<MatchResult> {
        let (result, cached_at) = self.map.get(key)?;
        if cached_at.elapsed() < MATCH_CACHE_TTL {
            Some(result.clone())
        } else {
            None
        }
    }

    /// Any cached entry, fresh or stale. The stale path serves store outages.
    fn any(&self, key: &str) -> Option<MatchResult> {
        self.map.get(key).map(|(result, _)| result.clone())
    }

    fn insert(&mut self, key: String, result: MatchResult) {
        if !self.map.contains_key(&key) {
            while self.map.len() >= MATCH_CACHE_CAPACITY {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.map.remove(&oldest);
                    }
                    None => break,
                }
            }
            self.order.push_back(key.clone());
        }
        self.map.insert(key, (result, Instant::now()));
    }
}

pub struct ContextMatcher {
    store: Arc<EventStore>,
    llm: Arc<dyn LlmClient>,
    tier: Arc<TierOrchestrator>,
    cache: Mutex<MatchCache>,
}

impl ContextMatcher {
    pub fn new(
        store: Arc<EventStore>,
        llm: Arc<dyn LlmClient>,
        tier: Arc<TierOrchestrator>,
    ) -> Self {
        Self {
            store,
            llm,
            tier,
            cache: Mutex::new(MatchCache::new()),
        }
    }

    pub fn cache_stats(&self) -> MatchCacheStats {
        let cache = self.cache.lock().unwrap();
        MatchCacheStats {
            size: cache.map.len(),
            capacity: MATCH_CACHE_CAPACITY,
        }
    }

    /// Match saved events against a visited URL. Never fails: store outages
    /// degrade to the stale cache entry or an empty result.
    pub async fn match_context(&self, url: &str, title: Option<&str>) -> MatchResult {
        let canonical = canonicalize_url(url);

        if let Some(hit) = self.cache.lock().unwrap().fresh(&canonical) {
            return hit;
        }

        let keywords = derive_keywords(&canonical, title);

        let candidates = match self.query_store(&canonical, &keywords).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("context store query failed: {:#}", e);
                return self
                    .cache
                    .lock()
                    .unwrap()
                    .any(&canonical)
                    .unwrap_or_default();
            }
        };

        let candidates = self.without_dismissed(&canonical, candidates).await;
        if candidates.is_empty() {
            let result = MatchResult::default();
            self.cache
                .lock()
                .unwrap()
                .insert(canonical, result.clone());
            return result;
        }

        let verdict = self
            .tier
            .with_fallback(
                "validate_relevance",
                ops::validate_relevance_llm(self.llm.as_ref(), &keywords, &candidates),
                async { Ok(heuristics::validate_relevance(&keywords, &candidates)) },
                RelevanceVerdict::default(),
            )
            .await;

        let events: Vec<Event> = verdict
            .relevant_indices
            .iter()
            .filter_map(|i| candidates.get(*i).cloned())
            .collect();
        let result = MatchResult {
            matched: !events.is_empty(),
            confidence: verdict.confidence,
            events,
        };

        self.cache.lock().unwrap().insert(canonical, result.clone());
        result
    }

    /// Query ladder: exact context/location match, then multi-field keyword
    /// search, then hybrid with a query vector when the embedding RPC is up.
    async fn query_store(&self, canonical: &str, keywords: &[String]) -> anyhow::Result<Vec<Event>> {
        let direct = self.store.try_context_matches(canonical).await?;
        if !direct.is_empty() {
            return Ok(direct);
        }
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let query = keywords.join(" ");
        let keyword_hits = self.store.try_hybrid_search(&query, None, 10).await?;
        if !keyword_hits.is_empty() {
            return Ok(keyword_hits);
        }

        // Embedding failures here are silent; they never count against the
        // tier orchestrator.
        match self.llm.embed(&query).await {
            Ok(vector) => self.store.try_hybrid_search(&query, Some(&vector), 10).await,
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn without_dismissed(&self, canonical: &str, candidates: Vec<Event>) -> Vec<Event> {
        let now = argus_core::now_secs();
        let dismissals = self.store.active_dismissals(now).await;
        if dismissals.is_empty() {
            return candidates;
        }
        let lower = canonical.to_lowercase();
        candidates
            .into_iter()
            .filter(|event| {
                !dismissals.iter().any(|d| {
                    d.event_id == event.id && lower.contains(&d.url_pattern)
                })
            })
            .collect()
    }
}

/// Strip tracking params (utm_*, ref, fbclid, gclid) and the fragment.
pub fn canonicalize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.trim().to_string();
    };
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &kept {
            serializer.append_pair(k, v);
        }
        parsed.set_query(Some(&serializer.finish()));
    }
    parsed.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// (host-pattern, activity, extra keyword) table; hosts that match contribute
/// their activity label alongside tokenized path segments.
const ACTIVITY_PATTERNS: [(&str, &str); 10] = [
    ("makemytrip|booking|airbnb|goibibo|tripadvisor|expedia", "travel"),
    ("netflix|hotstar|primevideo|disneyplus", "streaming"),
    ("amazon|flipkart|myntra", "shopping"),
    ("github|gitlab", "coding"),
    ("zomato|swiggy", "food"),
    ("linkedin|naukri", "jobs"),
    ("youtube", "video"),
    ("spotify", "music"),
    ("maps", "places"),
    ("calendar", "schedule"),
];

/// Derive match keywords from a canonical URL (plus the page title when the
/// client sent one). Path segments under three characters or made purely of
/// digits are dropped.
pub fn derive_keywords(canonical: &str, title: Option<&str>) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    let parsed = Url::parse(canonical).ok();

    if let Some(parsed) = &parsed {
        let host = parsed.host_str().unwrap_or("");
        for (pattern, activity) in ACTIVITY_PATTERNS {
            let re = regex::Regex::new(&format!("(?i)({pattern})")).unwrap();
            if re.is_match(host) {
                keywords.push(activity.to_string());
                if let Some(brand) = re.find(host) {
                    keywords.push(brand.as_str().to_lowercase());
                }
                break;
            }
        }

        // Host tokens minus www and TLD noise.
        for token in host.split('.') {
            let token = token.to_lowercase();
            if token.len() >= 3 && token != "www" && token != "com" && token != "org" {
                if !keywords.contains(&token) {
                    keywords.push(token);
                }
            }
        }

        for segment in parsed.path().split(['/', '-', '_']) {
            let token = segment.to_lowercase();
            if token.len() < 3 || token.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if !keywords.contains(&token) {
                keywords.push(token);
            }
        }
    }

    if let Some(title) = title {
        for token in heuristics::tokenize(title) {
            if token.len() >= 4 && !keywords.contains(&token) {
                keywords.push(token);
            }
        }
    }

    keywords.truncate(12);
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_strips_tracking() {
        assert_eq!(
            canonicalize_url("https://x.com/page?utm_source=mail&q=1&fbclid=abc#frag"),
            "https://x.com/page?q=1"
        );
        assert_eq!(
            canonicalize_url("https://x.com/page?utm_source=mail&ref=tw"),
            "https://x.com/page"
        );
        assert_eq!(canonicalize_url("not a url"), "not a url");
    }

    #[test]
    fn test_derive_keywords_travel_site() {
        let keywords = derive_keywords("https://www.makemytrip.com/goa-hotels", None);
        assert!(keywords.contains(&"travel".to_string()));
        assert!(keywords.contains(&"makemytrip".to_string()));
        assert!(keywords.contains(&"goa".to_string()));
        assert!(keywords.contains(&"hotels".to_string()));
    }

    #[test]
    fn test_derive_keywords_drops_short_and_numeric_segments() {
        let keywords = derive_keywords("https://example.net/a/12345/deals", None);
        assert!(!keywords.iter().any(|k| k == "a"));
        assert!(!keywords.iter().any(|k| k == "12345"));
        assert!(keywords.contains(&"deals".to_string()));
        assert!(keywords.contains(&"example".to_string()));
    }

    #[test]
    fn test_derive_keywords_uses_title() {
        let keywords = derive_keywords("https://example.net/", Some("Goa Beach Hotels"));
        assert!(keywords.contains(&"beach".to_string()));
        assert!(keywords.contains(&"hotels".to_string()));
    }

    #[test]
    fn test_match_cache_fifo_eviction() {
        let mut cache = MatchCache::new();
        for i in 0..MATCH_CACHE_CAPACITY + 10 {
            cache.insert(format!("url{i}"), MatchResult::default());
        }
        assert_eq!(cache.map.len(), MATCH_CACHE_CAPACITY);
        // The first-inserted entries were evicted.
        assert!(cache.any("url0").is_none());
        assert!(cache.any("url9").is_none());
        assert!(cache.any(&format!("url{}", MATCH_CACHE_CAPACITY + 9)).is_some());
    }
}

//! Hybrid search over the events collection: FTS5/BM25 keyword branch with
//! field boosts, cosine k-NN branch over stored embeddings, merged by
//! reciprocal rank fusion. Both branches filter to active statuses and the
//! hot window.

use crate::sqlite::{
    bytes_to_embedding, event_from_row, rows_to_events, EventStore, INACTIVE_STATUSES,
    SEARCHABLE_STATUSES,
};
use anyhow::Result;
use argus_core::{ArgusError, Event};
use sqlx::Row;
use std::collections::HashMap;

/// Candidate pool width for the k-NN branch.
const KNN_CANDIDATES: usize = 50;

/// RRF constant; ranks are discounted by 1/(k + rank).
const RRF_K: f64 = 60.0;

impl EventStore {
    /// Hybrid search. BM25-only when no query vector is supplied; events
    /// with null embeddings participate only in the keyword branch.
    pub async fn try_hybrid_search(
        &self,
        query: &str,
        query_vec: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let now = argus_core::now_secs();
        let keyword_ids = self.bm25_ids(query, now, limit.max(KNN_CANDIDATES)).await?;

        let vector_ids = match query_vec {
            Some(vec) => self.knn_ids(vec, now, limit).await?,
            None => Vec::new(),
        };

        let merged = rrf_merge(&vector_ids, &keyword_ids, RRF_K);
        let mut events = Vec::with_capacity(limit);
        for (id, _) in merged.into_iter().take(limit) {
            if let Some(event) = self.try_get_event(id).await? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Swallowing wrapper: store failures degrade to an empty result.
    pub async fn hybrid_search_events(
        &self,
        query: &str,
        query_vec: Option<&[f32]>,
        limit: usize,
    ) -> Vec<Event> {
        match self.try_hybrid_search(query, query_vec, limit).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("hybrid_search_events failed: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Keyword branch: multi-field BM25 with boosts title×3, keywords×2,
    /// description, location. Filtered to searchable statuses and hot window.
    async fn bm25_ids(&self, query: &str, now: i64, limit: usize) -> Result<Vec<i64>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT e.id AS id
            FROM events_fts
            JOIN events e ON e.id = events_fts.rowid
            WHERE events_fts MATCH ?
              AND e.status IN {SEARCHABLE_STATUSES}
              AND e.created_at >= ?
            ORDER BY bm25(events_fts, 3.0, 2.0, 1.0, 1.0)
            LIMIT ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&escaped)
            .bind(self.hot_window_start(now))
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await
            .map_err(|e| anyhow::Error::new(e).context(ArgusError::store("search", "events")))?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>("id").map_err(Into::into))
            .collect()
    }

    /// Vector branch: cosine similarity over embedded active events in the
    /// hot window, truncated to the candidate pool, top-k returned.
    async fn knn_ids(&self, query_vec: &[f32], now: i64, k: usize) -> Result<Vec<i64>> {
        let sql = format!(
            r#"
            SELECT id, embedding FROM events
            WHERE embedding IS NOT NULL
              AND status IN {SEARCHABLE_STATUSES}
              AND created_at >= ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(self.hot_window_start(now))
            .fetch_all(self.pool())
            .await
            .map_err(|e| anyhow::Error::new(e).context(ArgusError::store("knn", "events")))?;

        let mut scored: Vec<(i64, f32)> = rows
            .iter()
            .filter_map(|r| {
                let id: i64 = r.try_get("id").ok()?;
                let blob: Vec<u8> = r.try_get("embedding").ok()?;
                let embedding = bytes_to_embedding(&blob);
                Some((id, cosine_similarity(query_vec, &embedding)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(KNN_CANDIDATES);
        Ok(scored.into_iter().take(k).map(|(id, _)| id).collect())
    }

    /// Active events whose non-empty `context_url` is a substring of the
    /// (case-folded) URL, or whose location is when `context_url` is empty.
    pub async fn try_context_matches(&self, url: &str) -> Result<Vec<Event>> {
        let haystack = url.to_lowercase();
        let sql = format!(
            r#"
            SELECT * FROM events
            WHERE status IN {SEARCHABLE_STATUSES}
              AND (
                (context_url IS NOT NULL AND context_url != '' AND instr(?, context_url) > 0)
                OR (
                  (context_url IS NULL OR context_url = '')
                  AND location IS NOT NULL AND location != ''
                  AND instr(?, lower(location)) > 0
                )
              )
            ORDER BY created_at DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&haystack)
            .bind(&haystack)
            .fetch_all(self.pool())
            .await
            .map_err(|e| anyhow::Error::new(e).context(ArgusError::store("search", "events")))?;
        rows.iter().map(|r| event_from_row(r)).collect()
    }

    /// Events within ±60 minutes of `target`, excluding terminal statuses.
    /// The boundary is inclusive: exactly 3600 s apart is still a conflict.
    pub async fn find_conflicts(&self, target: i64, exclude_id: Option<i64>) -> Vec<Event> {
        let result = sqlx::query(
            r#"
            SELECT * FROM events
            WHERE event_time IS NOT NULL
              AND ABS(event_time - ?) <= 3600
              AND status NOT IN ('completed', 'expired')
              AND id != ?
            ORDER BY event_time ASC
            "#,
        )
        .bind(target)
        .bind(exclude_id.unwrap_or(-1))
        .fetch_all(self.pool())
        .await;
        rows_to_events(result, "find_conflicts")
    }

    /// Action-detection candidates: active events keyword-matched against the
    /// message, falling back to the most recent actives when nothing matches.
    pub async fn keyword_candidates(&self, text: &str, limit: i64) -> Vec<Event> {
        let escaped = escape_fts_query(text);
        if !escaped.is_empty() {
            let sql = format!(
                r#"
                SELECT e.* FROM events_fts
                JOIN events e ON e.id = events_fts.rowid
                WHERE events_fts MATCH ?
                  AND e.status NOT IN {INACTIVE_STATUSES}
                ORDER BY bm25(events_fts, 3.0, 2.0, 1.0, 1.0)
                LIMIT ?
                "#
            );
            let result = sqlx::query(&sql)
                .bind(&escaped)
                .bind(limit)
                .fetch_all(self.pool())
                .await;
            let matched = rows_to_events(result, "keyword_candidates");
            if !matched.is_empty() {
                return matched;
            }
        }
        self.active_events(limit).await
    }
}

/// Escape a query for FTS5 MATCH: each token quoted, joined with OR so a
/// single shared term is enough to surface a candidate (multi-match recall).
pub fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "")))
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Reciprocal rank fusion: documents appearing in both ranked lists get
/// additive scores. Input order is rank order (best first).
pub fn rrf_merge(vector_ids: &[i64], keyword_ids: &[i64], k: f64) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    for (rank, id) in vector_ids.iter().enumerate() {
        *scores.entry(*id).or_insert(0.0) += 1.0 / (k + rank as f64);
    }
    for (rank, id) in keyword_ids.iter().enumerate() {
        *scores.entry(*id).or_insert(0.0) += 1.0 / (k + rank as f64);
    }
    let mut merged: Vec<(i64, f64)> = scores.into_iter().collect();
    merged.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    merged
}

/// Cosine similarity between two vectors; 0.0 for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

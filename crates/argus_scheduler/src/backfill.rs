//! Embedding backfill: every five minutes, compute embeddings for up to 50
//! events stored without one. Failures are silent and never reported to the
//! tier orchestrator; the next pass retries.

use argus_reasoning::LlmClient;
use argus_store::EventStore;
use std::sync::Arc;
use std::time::Duration;

const BACKFILL_INTERVAL: Duration = Duration::from_secs(300);
const BACKFILL_BATCH: i64 = 50;

pub fn spawn_backfill(
    store: Arc<EventStore>,
    llm: Arc<dyn LlmClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(BACKFILL_INTERVAL);
        interval.tick().await; // skip the immediate first tick
        loop {
            interval.tick().await;
            let filled = run_backfill_once(&store, llm.as_ref()).await;
            if filled > 0 {
                tracing::info!("backfilled {} embeddings", filled);
            }
        }
    })
}

/// One pass; returns how many embeddings were written.
pub async fn run_backfill_once(store: &EventStore, llm: &dyn LlmClient) -> usize {
    let mut filled = 0;
    for event in store.events_missing_embedding(BACKFILL_BATCH).await {
        match llm.embed(&event.semantic_text()).await {
            Ok(vector) => {
                if store.set_embedding(event.id, &vector).await.unwrap_or(false) {
                    filled += 1;
                }
            }
            Err(e) => {
                tracing::debug!("backfill embedding for event {} failed: {:#}", event.id, e);
            }
        }
    }
    filled
}

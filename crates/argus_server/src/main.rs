use anyhow::Result;
use argus_core::{ArgusConfig, DeadLetter, Guard, ResponseCache};
use argus_gateway::{Broadcaster, Services};
use argus_ingest::{ContextMatcher, Pipeline};
use argus_reasoning::{LlmClient, OpenAiClient, TierOrchestrator};
use argus_scheduler::{spawn_backfill, RetryQueue, Scheduler, SchedulerConfig};
use argus_store::EventStore;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Proactive memory assistant server")]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "argus.toml")]
    config: String,

    /// Path to the event database
    #[arg(short, long, default_value = "data/argus.db")]
    db: String,

    /// Override the HTTP listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = ArgusConfig::load_or_default(&args.config);
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!("Initializing argus...");

    let guard = Guard::new(
        DeadLetter::new(config.data.dead_letter_path()),
        config.debug_errors,
    );
    if let Some(parent) = std::path::Path::new(&args.db).parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!("Opening event store at {}...", args.db);
    let store = Arc::new(
        EventStore::open(
            &args.db,
            guard,
            config.ingest.hot_window_days,
            config.ai.embed_dim,
        )
        .await?,
    );

    info!(
        "Connecting LLM provider at {} (model {})...",
        config.ai.base_url, config.ai.model
    );
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&config.ai)?);

    let tier = Arc::new(TierOrchestrator::new(
        config.ai.tier_mode,
        Duration::from_secs(config.ai.cooldown_base_secs),
    ));
    {
        // Lightweight probe: a one-token completion proves the provider is
        // back without burning a real request.
        let probe_llm = llm.clone();
        tier.register_probe(Arc::new(move || {
            let llm = probe_llm.clone();
            Box::pin(async move {
                llm.complete("Reply with the single word: ok", "ping").await?;
                Ok(())
            }) as argus_reasoning::ProbeFuture
        }));
    }

    let cache = Arc::new(ResponseCache::new(
        config.ai.cache_max_size,
        Duration::from_secs(config.ai.cache_ttl_secs),
    ));
    let broadcaster = Arc::new(Broadcaster::new());

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        llm.clone(),
        tier.clone(),
        cache.clone(),
        broadcaster.clone(),
        config.ingest.process_own_messages,
        config.ingest.skip_group_messages,
    ));
    let matcher = Arc::new(ContextMatcher::new(
        store.clone(),
        llm.clone(),
        tier.clone(),
    ));

    let queue = Arc::new(RetryQueue::new(DeadLetter::new(
        config.data.failed_reminders_path(),
    )));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        broadcaster.clone(),
        llm.clone(),
        tier.clone(),
        queue.clone(),
        SchedulerConfig {
            backups_dir: config.data.backups_dir(),
            retention_days: config.data.backup_retention_days,
            ..Default::default()
        },
    ));

    info!("Starting scheduler and embedding backfill...");
    let mut background = scheduler.spawn();
    background.push(spawn_backfill(store.clone(), llm.clone()));

    let services = Arc::new(Services {
        config,
        store,
        llm,
        tier,
        cache,
        broadcaster,
        pipeline,
        matcher,
        queue,
    });

    let result = argus_gateway::serve(services).await;

    info!("Stopping background tasks...");
    for handle in background {
        handle.abort();
    }
    result
}

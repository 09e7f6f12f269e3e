use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use watch_progress::{
    models::{PlayerSignal, ProgressKey, ProgressRecord},
    store::create_pool,
    Beacon, Config, HttpBeacon, HttpProgressClient, InMemoryProgressStore, PgProgressStore,
    PlayerSession, ProgressStore, ResumeChoice, ResumePrompt, SessionUpdate, StoreBackend,
    StoreBeacon,
};

/// Replay always takes the saved position
struct AutoResume;

#[async_trait::async_trait]
impl ResumePrompt for AutoResume {
    async fn choose(&self, record: &ProgressRecord) -> ResumeChoice {
        tracing::info!(position = record.current_time, "Resume prompt answered: resume");
        ResumeChoice::Resume
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("watch_progress=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let (store, beacon) = build_store(&config).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let header = lines
        .next_line()
        .await?
        .context("Expected a progress key header line on stdin")?;
    let key: ProgressKey =
        serde_json::from_str(&header).context("Invalid progress key header")?;
    key.validate()?;

    tracing::info!(key = %key, backend = ?config.store_backend, "Replaying playback session");

    let (session, mut updates) = PlayerSession::new(
        store.clone(),
        beacon,
        key.clone(),
        config.sync_settings(),
        config.continuity_settings(),
        Arc::new(AutoResume),
    );
    let handle = session.spawn();

    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update {
                SessionUpdate::StartAt { episode_id, position } => {
                    println!("start episode={} position={}", episode_id, position);
                }
                SessionUpdate::Reposition { position, notice } => {
                    let note = notice.map(|n| format!(" ({}, {})", n.message, n.resumed_at));
                    println!("reposition position={}{}", position, note.unwrap_or_default());
                }
            }
        }
    });

    let mut line_no = 1;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let signal: PlayerSignal = match serde_json::from_str(line) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping malformed signal");
                continue;
            }
        };
        if signal.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(signal.delay_ms)).await;
        }
        if !handle.signal(signal) {
            break;
        }
    }

    handle.close().await;
    let _ = printer.await;

    // Beacon sends run on detached tasks
    tokio::time::sleep(Duration::from_millis(200)).await;

    let history = store
        .list_recent_progress(&key.identity, key.profile_id, config.history_limit)
        .await?;
    let stats = store.watch_statistics(&key.identity, key.profile_id).await?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}

async fn build_store(
    config: &Config,
) -> anyhow::Result<(Arc<dyn ProgressStore>, Arc<dyn Beacon>)> {
    match config.store_backend {
        StoreBackend::Http => {
            let client = HttpProgressClient::new(config.api_base_url.clone());
            let beacon: Arc<dyn Beacon> = Arc::new(HttpBeacon::new(client.clone()));
            Ok((Arc::new(client), beacon))
        }
        StoreBackend::Postgres => {
            let pool = create_pool(&config.database_url).await?;
            let store = PgProgressStore::new(pool, config.progress_policy());
            store.migrate().await?;
            tracing::info!("Connected to Postgres progress store");
            let store: Arc<dyn ProgressStore> = Arc::new(store);
            Ok((store.clone(), Arc::new(StoreBeacon::new(store))))
        }
        StoreBackend::Memory => {
            let store: Arc<dyn ProgressStore> =
                Arc::new(InMemoryProgressStore::new(config.progress_policy()));
            Ok((store.clone(), Arc::new(StoreBeacon::new(store))))
        }
    }
}

use mimalloc::MiMalloc;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use netmirror::config::Config;
use netmirror::db::{ConnectionDataCache, CredentialStore, MirrorStorage};
use netmirror::provider::{AuthProvider, DelegatedAuthClient, HttpInventoryClientBuilder};
use netmirror::service::{
    BackgroundSyncScheduler, ClientPool, SyncOrchestrator, SyncStatusTracker,
    TokenLifecycleManager, sync_actor,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_url = %cfg.database_url,
        sync_interval_secs = cfg.sync.interval_secs,
        background_enabled = cfg.sync.background_enabled,
        "netmirror starting"
    );

    let storage = Arc::new(MirrorStorage::connect(&cfg.database_url).await?);
    let credentials: Arc<dyn CredentialStore> = storage.clone();
    let cache: Arc<dyn ConnectionDataCache> = storage.clone();

    let auth: Arc<dyn AuthProvider> = Arc::new(DelegatedAuthClient::new(&cfg.provider)?);
    let tokens = Arc::new(TokenLifecycleManager::new(
        credentials.clone(),
        auth,
        cfg.sync.token_expiry_buffer(),
    ));
    let builder = Arc::new(HttpInventoryClientBuilder::new(&cfg.provider)?);
    let pool = Arc::new(ClientPool::new(tokens, builder));

    let status = SyncStatusTracker::new(cache.clone());
    let orchestrator = Arc::new(SyncOrchestrator::new(pool.clone(), cache, status));
    let sync = sync_actor::spawn(orchestrator).await;

    // Status reads, manual triggers, authorization callbacks and disconnects
    // are served to the host application through `ConnectionService`; this
    // binary only runs the background side.
    let scheduler = BackgroundSyncScheduler::spawn(cfg.sync.clone(), credentials, sync.clone());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    scheduler.shutdown().await;
    sync.shutdown();
    pool.dispose().await;
    Ok(())
}

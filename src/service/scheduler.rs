//! Periodic driver for background syncs.
//!
//! After a warm-up delay the scheduler ticks on a fixed interval. Each tick
//! enumerates connections whose refresh token is still valid and fires each
//! through the sync actor; runs are detached, so a slow or failing connection
//! never delays the tick or its siblings. The stop signal is honored at tick
//! boundaries — in-flight runs are left to finish, bounded by the provider
//! timeouts.

use crate::config::SyncConfig;
use crate::db::CredentialStore;
use crate::service::sync_actor::SyncHandle;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct BackgroundSyncScheduler {
    config: SyncConfig,
    credentials: Arc<dyn CredentialStore>,
    sync: SyncHandle,
}

/// Controls a spawned scheduler; dropping it does not stop the loop.
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the loop to stop at the next boundary and waits for it.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("scheduler task join failed: {}", e);
        }
    }
}

impl BackgroundSyncScheduler {
    pub fn spawn(
        config: SyncConfig,
        credentials: Arc<dyn CredentialStore>,
        sync: SyncHandle,
    ) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler = Self {
            config,
            credentials,
            sync,
        };
        let task = tokio::spawn(scheduler.run(stop_rx));
        SchedulerHandle { stop_tx, task }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        if !self.config.background_enabled {
            info!("background sync disabled by configuration");
            return;
        }

        info!(
            interval_secs = self.config.interval_secs,
            startup_delay_secs = self.config.startup_delay_secs,
            "background sync scheduler started"
        );

        if Self::wait_or_stop(&mut stop_rx, self.config.startup_delay()).await {
            info!("scheduler stopped during warm-up");
            return;
        }

        loop {
            self.tick().await;
            if Self::wait_or_stop(&mut stop_rx, self.config.interval()).await {
                info!("scheduler stopped at tick boundary");
                return;
            }
        }
    }

    /// One pass over the eligible connections. Enumeration errors are logged
    /// and skipped; the loop always reaches the next tick.
    async fn tick(&self) {
        let eligible = match self.credentials.list_syncable(Utc::now()).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("scheduler could not enumerate connections: {}", e);
                return;
            }
        };

        debug!(connections = eligible.len(), "scheduler tick");
        for connection_id in eligible {
            self.sync.trigger_sync(connection_id);
        }
    }

    /// Sleeps for `delay`, returning true early if stop was signaled. A
    /// dropped handle counts as a stop signal.
    async fn wait_or_stop(stop_rx: &mut watch::Receiver<bool>, delay: std::time::Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = stop_rx.wait_for(|stopped| *stopped) => true,
        }
    }
}

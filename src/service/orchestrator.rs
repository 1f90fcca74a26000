//! The unit of work for one tenant connection: fetch the provider hierarchy
//! level by level and reconcile each level into the local mirror.
//!
//! Levels run strictly in order (organizations, then networks, then devices)
//! because each needs the live-parent set produced by the previous one.
//! Sibling parents within a level are fetched with bounded concurrency; their
//! writes touch disjoint scopes. A failed parent is skipped for the rest of
//! the run while its siblings keep going; reconciled sibling data is retained
//! even when the overall run ends up `Failed`.

use crate::db::ConnectionDataCache;
use crate::error::MirrorError;
use crate::provider::InventoryApi;
use crate::service::client_pool::ClientPool;
use crate::service::status::SyncStatusTracker;
use crate::types::{ProviderNetwork, SyncStep};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};

const SIBLING_FETCH_CONCURRENCY: usize = 4;

pub struct SyncOrchestrator {
    pool: Arc<ClientPool>,
    cache: Arc<dyn ConnectionDataCache>,
    status: SyncStatusTracker,
}

impl SyncOrchestrator {
    pub fn new(
        pool: Arc<ClientPool>,
        cache: Arc<dyn ConnectionDataCache>,
        status: SyncStatusTracker,
    ) -> Self {
        Self {
            pool,
            cache,
            status,
        }
    }

    pub fn status(&self) -> &SyncStatusTracker {
        &self.status
    }

    /// Runs one full sync for the connection, recording progress and the
    /// terminal outcome in SyncStatus. Rows reconciled before a failure stay
    /// committed; nothing is rolled back.
    pub async fn sync_connection(&self, connection_id: i64) -> Result<(), MirrorError> {
        self.status.begin(connection_id).await?;
        info!(connection_id, "sync started");

        match self.run(connection_id).await {
            Ok(()) => {
                self.status.complete(connection_id).await?;
                info!(connection_id, "sync completed");
                Ok(())
            }
            Err(e) => {
                error!(connection_id, error = %e, "sync failed");
                if let Err(status_err) = self.status.fail(connection_id, &e.to_string()).await {
                    warn!(connection_id, error = %status_err, "failed to record sync failure");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, connection_id: i64) -> Result<(), MirrorError> {
        // Step 1: resolve a client (may refresh the token) and reconcile
        // organizations. Whatever the provider returned is by definition the
        // live set at this scope.
        let client = self.pool.get_client(connection_id).await?;
        let now = Utc::now();

        let orgs = client.list_organizations().await.map_err(|e| {
            fetch_failed(SyncStep::Organizations, format!("connection {}: {}", connection_id, e))
        })?;
        let mut seen = Vec::with_capacity(orgs.len());
        for org in &orgs {
            self.cache.upsert_organization(connection_id, org, now).await?;
            seen.push(org.id.clone());
        }
        self.cache
            .soft_delete_organizations_absent(connection_id, &seen)
            .await?;
        info!(connection_id, organizations = orgs.len(), "organizations reconciled");

        let mut failures: Vec<(SyncStep, String)> = Vec::new();

        // Step 2: networks, per live organization.
        self.status.advance(connection_id, SyncStep::Networks).await?;
        let org_ids: Vec<String> = orgs.iter().map(|o| o.id.clone()).collect();
        let fetched = fetch_children(&client, org_ids.into_iter(), |c, id| async move {
            c.list_networks(&id).await
        })
        .await;

        let mut live_networks: Vec<ProviderNetwork> = Vec::new();
        for (org_id, result) in fetched {
            match result {
                Ok(networks) => {
                    let mut seen = Vec::with_capacity(networks.len());
                    for network in &networks {
                        self.cache
                            .upsert_network(connection_id, &org_id, network, now)
                            .await?;
                        seen.push(network.id.clone());
                    }
                    self.cache
                        .soft_delete_networks_absent(connection_id, &org_id, &seen)
                        .await?;
                    live_networks.extend(networks);
                }
                Err(e) => {
                    warn!(
                        connection_id,
                        organization = %org_id,
                        error = %e,
                        "network fetch failed; skipping this subtree for the rest of the run"
                    );
                    failures.push((SyncStep::Networks, format!("organization {}: {}", org_id, e)));
                }
            }
        }
        info!(connection_id, networks = live_networks.len(), "networks reconciled");

        // Step 3: devices, per network reconciled in this run.
        self.status.advance(connection_id, SyncStep::Devices).await?;
        let network_ids: Vec<String> = live_networks.iter().map(|n| n.id.clone()).collect();
        let fetched = fetch_children(
            &client,
            network_ids.into_iter(),
            |c, id| async move { c.list_devices(&id).await },
        )
        .await;

        let mut device_count = 0usize;
        for (network_id, result) in fetched {
            match result {
                Ok(devices) => {
                    let mut seen = Vec::with_capacity(devices.len());
                    for device in &devices {
                        self.cache
                            .upsert_device(connection_id, &network_id, device, now)
                            .await?;
                        seen.push(device.serial.clone());
                    }
                    self.cache
                        .soft_delete_devices_absent(connection_id, &network_id, &seen)
                        .await?;
                    device_count += devices.len();
                }
                Err(e) => {
                    warn!(
                        connection_id,
                        network = %network_id,
                        error = %e,
                        "device fetch failed"
                    );
                    failures.push((SyncStep::Devices, format!("network {}: {}", network_id, e)));
                }
            }
        }
        info!(connection_id, devices = device_count, "devices reconciled");

        match failures.first() {
            None => Ok(()),
            Some((step, _)) => {
                let detail = failures
                    .iter()
                    .map(|(_, d)| d.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(fetch_failed(*step, detail))
            }
        }
    }
}

fn fetch_failed(step: SyncStep, detail: String) -> MirrorError {
    MirrorError::FetchFailed {
        step: step.label().to_string(),
        detail,
    }
}

/// Fetches one level's children for each parent id with bounded concurrency.
/// Results come back per parent so a failed sibling cannot mask the others.
async fn fetch_children<T, F, Fut>(
    client: &Arc<dyn InventoryApi>,
    parent_ids: impl Iterator<Item = String>,
    fetch: F,
) -> Vec<(String, Result<Vec<T>, MirrorError>)>
where
    F: Fn(Arc<dyn InventoryApi>, String) -> Fut + Copy,
    Fut: Future<Output = Result<Vec<T>, MirrorError>>,
{
    stream::iter(parent_ids)
        .map(|id| {
            let client = client.clone();
            async move {
                let result = fetch(client, id.clone()).await;
                (id, result)
            }
        })
        .buffer_unordered(SIBLING_FETCH_CONCURRENCY)
        .collect()
        .await
}

//! Shared test harness: a real SQLite mirror behind fake provider seams.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use netmirror::db::{Credential, CredentialStore, MirrorStorage};
use netmirror::error::MirrorError;
use netmirror::provider::{AuthProvider, BuildInventoryClient, InventoryApi, TokenGrant};
use netmirror::service::{ClientPool, SyncOrchestrator, SyncStatusTracker, TokenLifecycleManager};
use netmirror::types::{ProviderDevice, ProviderNetwork, ProviderOrganization, SyncStatus};

/// Auth provider that derives access tokens from refresh tokens, so tests can
/// predict which token a given connection's client carries.
pub struct FakeAuth {
    pub refresh_calls: AtomicUsize,
}

impl FakeAuth {
    pub fn new() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    fn authorize_url(&self, state: &str) -> url::Url {
        url::Url::parse(&format!("https://auth.test/authorize?state={}", state)).unwrap()
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, MirrorError> {
        let now = Utc::now();
        Ok(TokenGrant {
            access_token: format!("access-code-{}", code),
            expires_at: now + Duration::hours(1),
            refresh_token: Some(format!("refresh-code-{}", code)),
            refresh_expires_at: Some(now + Duration::days(90)),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, MirrorError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenGrant {
            access_token: format!("access-{}", refresh_token),
            expires_at: Utc::now() + Duration::hours(1),
            refresh_token: None,
            refresh_expires_at: None,
        })
    }
}

#[derive(Default)]
pub struct InventoryState {
    pub orgs: Vec<ProviderOrganization>,
    /// organization external id -> its networks
    pub networks: HashMap<String, Vec<ProviderNetwork>>,
    /// network external id -> its devices
    pub devices: HashMap<String, Vec<ProviderDevice>>,
    /// access tokens whose organization listing fails outright
    pub fail_tokens: HashSet<String>,
    /// organizations whose network listing fails
    pub fail_networks_for: HashSet<String>,
    /// organization-list call count per access token
    pub org_list_calls: HashMap<String, usize>,
}

/// Provider-side dataset shared by every connection in a test.
#[derive(Default)]
pub struct FakeInventory {
    pub state: Mutex<InventoryState>,
}

impl FakeInventory {
    pub fn org_list_calls(&self, token: &str) -> usize {
        *self
            .state
            .lock()
            .unwrap()
            .org_list_calls
            .get(token)
            .unwrap_or(&0)
    }
}

fn provider_down() -> MirrorError {
    MirrorError::FetchFailed {
        step: "provider call".to_string(),
        detail: "simulated outage".to_string(),
    }
}

/// What the pool hands out: the shared dataset viewed through one token.
pub struct TokenScopedInventory {
    token: String,
    shared: Arc<FakeInventory>,
}

#[async_trait]
impl InventoryApi for TokenScopedInventory {
    async fn list_organizations(&self) -> Result<Vec<ProviderOrganization>, MirrorError> {
        let mut state = self.shared.state.lock().unwrap();
        *state.org_list_calls.entry(self.token.clone()).or_insert(0) += 1;
        if state.fail_tokens.contains(&self.token) {
            return Err(provider_down());
        }
        Ok(state.orgs.clone())
    }

    async fn list_networks(
        &self,
        organization_id: &str,
    ) -> Result<Vec<ProviderNetwork>, MirrorError> {
        let state = self.shared.state.lock().unwrap();
        if state.fail_networks_for.contains(organization_id) {
            return Err(provider_down());
        }
        Ok(state
            .networks
            .get(organization_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_devices(&self, network_id: &str) -> Result<Vec<ProviderDevice>, MirrorError> {
        let state = self.shared.state.lock().unwrap();
        Ok(state.devices.get(network_id).cloned().unwrap_or_default())
    }
}

pub struct FakeInventoryBuilder {
    pub shared: Arc<FakeInventory>,
}

impl BuildInventoryClient for FakeInventoryBuilder {
    fn build(&self, access_token: &str) -> Arc<dyn InventoryApi> {
        Arc::new(TokenScopedInventory {
            token: access_token.to_string(),
            shared: self.shared.clone(),
        })
    }
}

pub struct Harness {
    pub db_path: PathBuf,
    pub storage: Arc<MirrorStorage>,
    pub inventory: Arc<FakeInventory>,
    pub auth: Arc<FakeAuth>,
    pub tokens: Arc<TokenLifecycleManager>,
    pub pool: Arc<ClientPool>,
    pub status: SyncStatusTracker,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl Harness {
    pub async fn new(test_name: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX_EPOCH")
            .as_nanos();
        let mut db_path = std::env::temp_dir();
        db_path.push(format!(
            "netmirror-{}-{}-{}.sqlite",
            test_name,
            std::process::id(),
            nanos
        ));

        let storage = Arc::new(
            MirrorStorage::connect(&format!("sqlite:{}", db_path.display()))
                .await
                .expect("failed to open test database"),
        );

        let inventory = Arc::new(FakeInventory::default());
        let auth = Arc::new(FakeAuth::new());
        let tokens = Arc::new(TokenLifecycleManager::new(
            storage.clone(),
            auth.clone(),
            Duration::minutes(5),
        ));
        let pool = Arc::new(ClientPool::new(
            tokens.clone(),
            Arc::new(FakeInventoryBuilder {
                shared: inventory.clone(),
            }),
        ));
        let status = SyncStatusTracker::new(storage.clone());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            pool.clone(),
            storage.clone(),
            status.clone(),
        ));

        Self {
            db_path,
            storage,
            inventory,
            auth,
            tokens,
            pool,
            status,
            orchestrator,
        }
    }

    /// Inserts a connection row plus a credential whose refresh token is
    /// `refresh-<id>`, valid for the given number of days.
    pub async fn add_connection(&self, display_name: &str, refresh_valid_days: i64) -> i64 {
        let conn = self
            .storage
            .insert_connection("tenant-1", display_name, "invgrid")
            .await
            .unwrap();
        let now = Utc::now();
        self.storage
            .upsert_credential(&Credential {
                connection_id: conn.id,
                refresh_token: format!("refresh-{}", conn.id),
                refresh_expires_at: now + Duration::days(refresh_valid_days),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        conn.id
    }

    /// The access token the fake auth provider mints for a connection.
    pub fn access_token_for(&self, connection_id: i64) -> String {
        format!("access-refresh-{}", connection_id)
    }

    pub fn org(&self, id: &str, name: &str) -> ProviderOrganization {
        ProviderOrganization {
            id: id.to_string(),
            name: name.to_string(),
            url: None,
        }
    }

    pub fn network(&self, id: &str, org_id: &str, name: &str) -> ProviderNetwork {
        ProviderNetwork {
            id: id.to_string(),
            organization_id: Some(org_id.to_string()),
            name: name.to_string(),
            time_zone: Some("UTC".to_string()),
            tags: vec!["mirror-test".to_string()],
        }
    }

    pub fn device(&self, serial: &str, network_id: &str, name: &str) -> ProviderDevice {
        ProviderDevice {
            serial: serial.to_string(),
            network_id: Some(network_id.to_string()),
            name: Some(name.to_string()),
            model: Some("MX68".to_string()),
            mac: None,
            firmware: Some("16.16".to_string()),
        }
    }

    /// 1 organization, 2 networks, 5 devices (3 + 2).
    pub fn seed_small_hierarchy(&self) {
        let mut state = self.inventory.state.lock().unwrap();
        state.orgs = vec![self.org("org-1", "Acme")];
        state.networks.insert(
            "org-1".to_string(),
            vec![
                self.network("net-1", "org-1", "HQ"),
                self.network("net-2", "org-1", "Branch"),
            ],
        );
        state.devices.insert(
            "net-1".to_string(),
            vec![
                self.device("Q2KN-0001", "net-1", "core-sw"),
                self.device("Q2KN-0002", "net-1", "edge-fw"),
                self.device("Q2KN-0003", "net-1", "ap-lobby"),
            ],
        );
        state.devices.insert(
            "net-2".to_string(),
            vec![
                self.device("Q2KN-0004", "net-2", "branch-fw"),
                self.device("Q2KN-0005", "net-2", "ap-floor"),
            ],
        );
    }

    pub async fn wait_for_terminal(&self, connection_id: i64) -> SyncStatus {
        for _ in 0..200 {
            let status = self.status.read(connection_id).await.unwrap();
            if status.state.is_terminal() {
                return status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("sync for connection {} never reached a terminal state", connection_id);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}

//! The surface other subsystems talk to: read sync status, trigger a sync,
//! complete an authorization, disconnect.

use crate::db::{ConnectionDataCache, Credential, CredentialStore};
use crate::error::MirrorError;
use crate::provider::AuthProvider;
use crate::service::client_pool::ClientPool;
use crate::service::status::SyncStatusTracker;
use crate::service::sync_actor::SyncHandle;
use crate::service::token_manager::TokenLifecycleManager;
use crate::types::SyncStatus;

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Fallback refresh-token horizon when the provider does not report one.
const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 90;

pub struct ConnectionService {
    credentials: Arc<dyn CredentialStore>,
    cache: Arc<dyn ConnectionDataCache>,
    tokens: Arc<TokenLifecycleManager>,
    pool: Arc<ClientPool>,
    status: SyncStatusTracker,
    sync: SyncHandle,
    auth: Arc<dyn AuthProvider>,
}

impl ConnectionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        cache: Arc<dyn ConnectionDataCache>,
        tokens: Arc<TokenLifecycleManager>,
        pool: Arc<ClientPool>,
        status: SyncStatusTracker,
        sync: SyncHandle,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            credentials,
            cache,
            tokens,
            pool,
            status,
            sync,
            auth,
        }
    }

    pub async fn sync_status(&self, connection_id: i64) -> Result<SyncStatus, MirrorError> {
        self.status.read(connection_id).await
    }

    /// Fire-and-forget; poll [`Self::sync_status`] for the outcome.
    pub fn trigger_sync_now(&self, connection_id: i64) {
        self.sync.trigger_sync(connection_id);
    }

    /// Where to send the user for consent; the redirect/callback UI itself
    /// lives outside this crate.
    pub fn authorize_url(&self, state: &str) -> Url {
        self.auth.authorize_url(state)
    }

    /// Exchanges the callback code and persists the refresh grant, then kicks
    /// off an initial sync.
    pub async fn complete_authorization(
        &self,
        connection_id: i64,
        code: &str,
    ) -> Result<(), MirrorError> {
        let grant = self.auth.exchange_code(code).await?;
        let refresh_token = grant.refresh_token.ok_or_else(|| {
            MirrorError::Oauth2Token("authorization response carried no refresh token".to_string())
        })?;

        let now = Utc::now();
        let existing = self.credentials.get_credential(connection_id).await?;
        let credential = Credential {
            connection_id,
            refresh_token,
            refresh_expires_at: grant
                .refresh_expires_at
                .unwrap_or(now + Duration::days(DEFAULT_REFRESH_TOKEN_TTL_DAYS)),
            created_at: existing.map(|c| c.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.credentials.upsert_credential(&credential).await?;
        info!(connection_id, "authorization completed, credential stored");

        self.sync.trigger_sync(connection_id);
        Ok(())
    }

    /// Evicts in-memory state, then deletes the credential and every cached
    /// row for the connection. The mirror for this tenant is gone afterwards.
    pub async fn disconnect(&self, connection_id: i64) -> Result<(), MirrorError> {
        self.tokens.remove_connection(connection_id).await;
        self.pool.remove_client(connection_id).await;
        self.credentials.delete_credential(connection_id).await?;
        self.cache.purge_connection(connection_id).await?;
        info!(connection_id, "connection disconnected and purged");
        Ok(())
    }
}

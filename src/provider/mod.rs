//! Client-side seams for the two upstream collaborators: the delegated-auth
//! provider (token grants) and the inventory API (read-only resource listings).

pub mod inventory;
pub mod oauth;

pub use inventory::{HttpInventoryClientBuilder, InventoryClient};
pub use oauth::DelegatedAuthClient;

use crate::error::MirrorError;
use crate::types::{ProviderDevice, ProviderNetwork, ProviderOrganization};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Outcome of a code exchange or refresh against the delegated-auth provider.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Present when the provider rotated the refresh token.
    pub refresh_token: Option<String>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Consent redirect target carrying the given opaque state.
    fn authorize_url(&self, state: &str) -> url::Url;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, MirrorError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, MirrorError>;
}

#[async_trait]
pub trait InventoryApi: Send + Sync {
    async fn list_organizations(&self) -> Result<Vec<ProviderOrganization>, MirrorError>;

    async fn list_networks(
        &self,
        organization_id: &str,
    ) -> Result<Vec<ProviderNetwork>, MirrorError>;

    async fn list_devices(&self, network_id: &str) -> Result<Vec<ProviderDevice>, MirrorError>;
}

/// Construction seam between the client pool and concrete API clients, so the
/// pool's caching discipline is testable without HTTP.
pub trait BuildInventoryClient: Send + Sync {
    fn build(&self, access_token: &str) -> Arc<dyn InventoryApi>;
}

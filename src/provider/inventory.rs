use crate::config::ProviderConfig;
use crate::error::{IsRetryable, MirrorError};
use crate::provider::{BuildInventoryClient, InventoryApi};
use crate::types::{ProviderDevice, ProviderNetwork, ProviderOrganization};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// One tenant connection's handle onto the inventory API. Built by the pool
/// with a specific access token and replaced wholesale when the token changes.
pub struct InventoryClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    max_attempts: usize,
}

impl InventoryClient {
    fn retry_policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(3))
            .with_max_times(self.max_attempts)
            .with_jitter()
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, MirrorError> {
        let url = self.base_url.join(path)?;

        (|| async {
            let resp = self
                .http
                .get(url.clone())
                .bearer_auth(&self.token)
                .header("Accept", "application/json")
                .send()
                .await?;
            if resp.status().is_server_error() {
                let status = resp.status();
                let err = resp.error_for_status().unwrap_err();
                warn!("inventory API server error (will retry): {}", status);
                return Err(MirrorError::Reqwest(err));
            }
            let resp = resp.error_for_status()?;
            Ok(resp.json::<T>().await?)
        })
        .retry(self.retry_policy())
        .when(|e: &MirrorError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!("inventory request retrying after error {}, sleeping {:?}", err, dur);
        })
        .await
    }
}

#[async_trait]
impl InventoryApi for InventoryClient {
    async fn list_organizations(&self) -> Result<Vec<ProviderOrganization>, MirrorError> {
        self.get_json("organizations").await
    }

    async fn list_networks(
        &self,
        organization_id: &str,
    ) -> Result<Vec<ProviderNetwork>, MirrorError> {
        self.get_json(&format!("organizations/{}/networks", organization_id))
            .await
    }

    async fn list_devices(&self, network_id: &str) -> Result<Vec<ProviderDevice>, MirrorError> {
        self.get_json(&format!("networks/{}/devices", network_id))
            .await
    }
}

/// Builds HTTP-backed inventory clients sharing one connection pool.
pub struct HttpInventoryClientBuilder {
    http: reqwest::Client,
    base_url: Url,
    max_attempts: usize,
}

impl HttpInventoryClientBuilder {
    /// `api_base_url` must end with a trailing slash so relative joins stay
    /// under the versioned prefix.
    pub fn new(cfg: &ProviderConfig) -> Result<Self, MirrorError> {
        let http = reqwest::Client::builder()
            .user_agent("netmirror/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(cfg.timeout())
            .http2_adaptive_window(true)
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.api_base_url.clone(),
            max_attempts: cfg.max_attempts,
        })
    }
}

impl BuildInventoryClient for HttpInventoryClientBuilder {
    fn build(&self, access_token: &str) -> Arc<dyn InventoryApi> {
        Arc::new(InventoryClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: access_token.to_string(),
            max_attempts: self.max_attempts,
        })
    }
}

//! One reusable inventory client handle per connection.
//!
//! A pooled handle stays valid as long as the access token it was built with
//! is still the current one; a token change swaps the handle wholesale. The
//! map holds at most one live client per connection id.

use crate::error::MirrorError;
use crate::provider::{BuildInventoryClient, InventoryApi};
use crate::service::token_manager::TokenLifecycleManager;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

struct PooledClient {
    token: String,
    client: Arc<dyn InventoryApi>,
}

pub struct ClientPool {
    tokens: Arc<TokenLifecycleManager>,
    builder: Arc<dyn BuildInventoryClient>,
    clients: RwLock<HashMap<i64, PooledClient>>,
}

impl ClientPool {
    pub fn new(tokens: Arc<TokenLifecycleManager>, builder: Arc<dyn BuildInventoryClient>) -> Self {
        Self {
            tokens,
            builder,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves a client built with a currently valid token, constructing or
    /// rebuilding one only when needed. Construction happens under the write
    /// lock so concurrent first callers converge on a single instance.
    pub async fn get_client(&self, connection_id: i64) -> Result<Arc<dyn InventoryApi>, MirrorError> {
        let token = self.tokens.get_valid_access_token(connection_id).await?;

        if let Some(entry) = self.clients.read().await.get(&connection_id) {
            if entry.token == token {
                return Ok(entry.client.clone());
            }
        }

        let mut clients = self.clients.write().await;
        // Re-check: a concurrent caller may have won the race while we waited.
        if let Some(entry) = clients.get(&connection_id) {
            if entry.token == token {
                return Ok(entry.client.clone());
            }
            debug!(connection_id, "token changed, rebuilding pooled client");
        }

        let client = self.builder.build(&token);
        clients.insert(
            connection_id,
            PooledClient {
                token,
                client: client.clone(),
            },
        );
        Ok(client)
    }

    /// Drops the pooled handle; used on disconnect.
    pub async fn remove_client(&self, connection_id: i64) {
        self.clients.write().await.remove(&connection_id);
    }

    /// Tears down every pooled client at shutdown.
    pub async fn dispose(&self) {
        let mut clients = self.clients.write().await;
        let count = clients.len();
        clients.clear();
        info!(count, "client pool disposed");
    }
}

//! Access-token lifecycle: in-memory cache, refresh on demand, rotation.
//!
//! Access tokens never touch the database; losing the cache only costs one
//! refresh round-trip. Concurrent callers for one connection may refresh
//! redundantly, which is tolerated — the persisted credential follows
//! last-successful-write-wins and is never left half-written.

use crate::db::{Credential, CredentialStore};
use crate::error::MirrorError;
use crate::provider::AuthProvider;

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct CachedAccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct TokenLifecycleManager {
    credentials: Arc<dyn CredentialStore>,
    auth: Arc<dyn AuthProvider>,
    /// Tokens within this margin of expiry are treated as stale.
    expiry_buffer: Duration,
    cache: RwLock<HashMap<i64, CachedAccessToken>>,
}

impl TokenLifecycleManager {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        auth: Arc<dyn AuthProvider>,
        expiry_buffer: Duration,
    ) -> Self {
        Self {
            credentials,
            auth,
            expiry_buffer,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a bearer token valid for at least the configured buffer,
    /// refreshing through the provider when the cached one is stale or absent.
    pub async fn get_valid_access_token(&self, connection_id: i64) -> Result<String, MirrorError> {
        let now = Utc::now();

        if let Some(cached) = self.cache.read().await.get(&connection_id) {
            if cached.expires_at - now > self.expiry_buffer {
                return Ok(cached.value.clone());
            }
        }

        let cred = self
            .credentials
            .get_credential(connection_id)
            .await?
            .ok_or(MirrorError::CredentialMissing(connection_id))?;

        if cred.refresh_expires_at <= now {
            return Err(MirrorError::CredentialExpired(connection_id));
        }

        let grant = match self.auth.refresh(&cred.refresh_token).await {
            Ok(grant) => grant,
            // The provider rejecting the grant itself means the refresh token
            // is dead regardless of its recorded expiry.
            Err(MirrorError::Oauth2Server { error }) if error == "invalid_grant" => {
                warn!(connection_id, "refresh token rejected by provider");
                return Err(MirrorError::CredentialExpired(connection_id));
            }
            Err(e) => {
                return Err(MirrorError::RefreshFailed(e.to_string()));
            }
        };

        self.cache.write().await.insert(
            connection_id,
            CachedAccessToken {
                value: grant.access_token.clone(),
                expires_at: grant.expires_at,
            },
        );
        debug!(connection_id, "access token cached");

        if let Some(rotated) = grant.refresh_token {
            if rotated != cred.refresh_token {
                let updated = Credential {
                    refresh_token: rotated,
                    refresh_expires_at: grant
                        .refresh_expires_at
                        .unwrap_or(cred.refresh_expires_at),
                    updated_at: now,
                    ..cred
                };
                self.credentials.upsert_credential(&updated).await?;
                info!(connection_id, "rotated refresh token persisted");
            }
        }

        Ok(grant.access_token)
    }

    /// Evicts the cached token; used on disconnect.
    pub async fn remove_connection(&self, connection_id: i64) {
        self.cache.write().await.remove(&connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TokenGrant;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeCredentialStore {
        rows: Mutex<HashMap<i64, Credential>>,
    }

    impl FakeCredentialStore {
        fn with(cred: Credential) -> Self {
            let mut rows = HashMap::new();
            rows.insert(cred.connection_id, cred);
            Self {
                rows: Mutex::new(rows),
            }
        }
    }

    #[async_trait]
    impl CredentialStore for FakeCredentialStore {
        async fn get_credential(&self, id: i64) -> Result<Option<Credential>, MirrorError> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }

        async fn upsert_credential(&self, cred: &Credential) -> Result<(), MirrorError> {
            self.rows
                .lock()
                .unwrap()
                .insert(cred.connection_id, cred.clone());
            Ok(())
        }

        async fn delete_credential(&self, id: i64) -> Result<(), MirrorError> {
            self.rows.lock().unwrap().remove(&id);
            Ok(())
        }

        async fn list_syncable(&self, now: DateTime<Utc>) -> Result<Vec<i64>, MirrorError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|c| c.refresh_expires_at > now)
                .map(|c| c.connection_id)
                .collect())
        }
    }

    struct FakeAuthProvider {
        refresh_calls: AtomicUsize,
        grant: Mutex<Result<TokenGrant, String>>,
        seen_refresh_tokens: Mutex<Vec<String>>,
    }

    impl FakeAuthProvider {
        fn granting(grant: TokenGrant) -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                grant: Mutex::new(Ok(grant)),
                seen_refresh_tokens: Mutex::new(Vec::new()),
            }
        }

        fn failing(kind: &str) -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                grant: Mutex::new(Err(kind.to_string())),
                seen_refresh_tokens: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthProvider for FakeAuthProvider {
        fn authorize_url(&self, _state: &str) -> url::Url {
            url::Url::parse("https://auth.test/authorize").unwrap()
        }

        async fn exchange_code(&self, _code: &str) -> Result<TokenGrant, MirrorError> {
            unimplemented!("not used by the token manager")
        }

        async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, MirrorError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_refresh_tokens
                .lock()
                .unwrap()
                .push(refresh_token.to_string());
            match &*self.grant.lock().unwrap() {
                Ok(grant) => Ok(grant.clone()),
                Err(kind) if kind == "invalid_grant" => Err(MirrorError::Oauth2Server {
                    error: "invalid_grant".to_string(),
                }),
                Err(kind) => Err(MirrorError::Oauth2Token(kind.clone())),
            }
        }
    }

    fn credential(connection_id: i64, refresh_valid_for: Duration) -> Credential {
        let now = Utc::now();
        Credential {
            connection_id,
            refresh_token: "refresh-original".to_string(),
            refresh_expires_at: now + refresh_valid_for,
            created_at: now,
            updated_at: now,
        }
    }

    fn grant(valid_for: Duration) -> TokenGrant {
        TokenGrant {
            access_token: "access-1".to_string(),
            expires_at: Utc::now() + valid_for,
            refresh_token: None,
            refresh_expires_at: None,
        }
    }

    fn manager(
        store: Arc<FakeCredentialStore>,
        auth: Arc<FakeAuthProvider>,
    ) -> TokenLifecycleManager {
        TokenLifecycleManager::new(store, auth, Duration::minutes(5))
    }

    #[tokio::test]
    async fn cached_token_inside_buffer_skips_refresh() {
        let store = Arc::new(FakeCredentialStore::with(credential(1, Duration::days(30))));
        let auth = Arc::new(FakeAuthProvider::granting(grant(Duration::minutes(10))));
        let mgr = manager(store, auth.clone());

        let first = mgr.get_valid_access_token(1).await.unwrap();
        assert_eq!(auth.calls(), 1);

        // 10 minutes left against a 5 minute buffer: served from cache.
        let second = mgr.get_valid_access_token(1).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test]
    async fn near_expiry_token_triggers_exactly_one_refresh() {
        let store = Arc::new(FakeCredentialStore::with(credential(1, Duration::days(30))));
        let auth = Arc::new(FakeAuthProvider::granting(grant(Duration::minutes(3))));
        let mgr = manager(store, auth.clone());

        mgr.get_valid_access_token(1).await.unwrap();
        assert_eq!(auth.calls(), 1);

        // 3 minutes left is inside the 5 minute buffer, so the cache misses.
        mgr.get_valid_access_token(1).await.unwrap();
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test]
    async fn expired_refresh_token_fails_without_provider_call() {
        let store = Arc::new(FakeCredentialStore::with(credential(
            1,
            Duration::seconds(-1),
        )));
        let auth = Arc::new(FakeAuthProvider::granting(grant(Duration::hours(1))));
        let mgr = manager(store, auth.clone());

        let err = mgr.get_valid_access_token(1).await.unwrap_err();
        assert!(matches!(err, MirrorError::CredentialExpired(1)));
        assert_eq!(auth.calls(), 0);
    }

    #[tokio::test]
    async fn rotation_overwrites_persisted_credential() {
        let store = Arc::new(FakeCredentialStore::with(credential(1, Duration::days(30))));
        let rotated = TokenGrant {
            access_token: "access-2".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
            refresh_token: Some("refresh-rotated".to_string()),
            refresh_expires_at: Some(Utc::now() + Duration::days(90)),
        };
        let auth = Arc::new(FakeAuthProvider::granting(rotated));
        let mgr = manager(store.clone(), auth.clone());

        mgr.get_valid_access_token(1).await.unwrap();

        let stored = store.get_credential(1).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token, "refresh-rotated");

        // Force a second refresh; the rotated token must be the one sent.
        mgr.remove_connection(1).await;
        mgr.get_valid_access_token(1).await.unwrap();
        let seen = auth.seen_refresh_tokens.lock().unwrap().clone();
        assert_eq!(seen, vec!["refresh-original", "refresh-rotated"]);
    }

    #[tokio::test]
    async fn transient_refresh_failure_keeps_credential_intact() {
        let original = credential(1, Duration::days(30));
        let store = Arc::new(FakeCredentialStore::with(original.clone()));
        let auth = Arc::new(FakeAuthProvider::failing("connection reset"));
        let mgr = manager(store.clone(), auth);

        let err = mgr.get_valid_access_token(1).await.unwrap_err();
        assert!(matches!(err, MirrorError::RefreshFailed(_)));
        assert_eq!(store.get_credential(1).await.unwrap().unwrap(), original);
    }

    #[tokio::test]
    async fn invalid_grant_surfaces_as_credential_expired() {
        let store = Arc::new(FakeCredentialStore::with(credential(1, Duration::days(30))));
        let auth = Arc::new(FakeAuthProvider::failing("invalid_grant"));
        let mgr = manager(store, auth);

        let err = mgr.get_valid_access_token(1).await.unwrap_err();
        assert!(matches!(err, MirrorError::CredentialExpired(1)));
    }
}

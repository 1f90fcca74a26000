//! Persistence module: storage contracts, models and the SQLite implementation.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `sqlite.rs`: `MirrorStorage`, the production store
//!
//! The two traits below are the read/write contracts the sync core depends on;
//! everything above this module is storage-engine agnostic.

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::{CachedDevice, CachedNetwork, CachedOrganization, Connection, Credential};
pub use schema::SQLITE_INIT;
pub use sqlite::{MirrorStorage, SqlitePool};

use crate::error::MirrorError;
use crate::types::{ProviderDevice, ProviderNetwork, ProviderOrganization, SyncStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One Credential row per connection, unique by connection id.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(&self, connection_id: i64) -> Result<Option<Credential>, MirrorError>;

    /// Insert or overwrite the connection's credential. `created_at` is kept
    /// from the first insert; everything else follows the argument.
    async fn upsert_credential(&self, credential: &Credential) -> Result<(), MirrorError>;

    async fn delete_credential(&self, connection_id: i64) -> Result<(), MirrorError>;

    /// Ids of active connections whose refresh token is still valid at `now`;
    /// the scheduler's work list.
    async fn list_syncable(&self, now: DateTime<Utc>) -> Result<Vec<i64>, MirrorError>;
}

/// Mirrored provider data plus the per-connection sync status row.
///
/// Upserts key on (connection id, external id): an insert stamps `created_at`,
/// an update rewrites the mutable fields, clears the deleted flag and advances
/// `last_synced_at`. Soft deletes flag rows absent from the latest fetch at a
/// scope; nothing here ever physically removes a row except `purge_connection`.
#[async_trait]
pub trait ConnectionDataCache: Send + Sync {
    async fn upsert_organization(
        &self,
        connection_id: i64,
        org: &ProviderOrganization,
        synced_at: DateTime<Utc>,
    ) -> Result<(), MirrorError>;

    async fn soft_delete_organizations_absent(
        &self,
        connection_id: i64,
        seen_external_ids: &[String],
    ) -> Result<u64, MirrorError>;

    async fn list_organizations(
        &self,
        connection_id: i64,
    ) -> Result<Vec<CachedOrganization>, MirrorError>;

    async fn upsert_network(
        &self,
        connection_id: i64,
        organization_external_id: &str,
        network: &ProviderNetwork,
        synced_at: DateTime<Utc>,
    ) -> Result<(), MirrorError>;

    async fn soft_delete_networks_absent(
        &self,
        connection_id: i64,
        organization_external_id: &str,
        seen_external_ids: &[String],
    ) -> Result<u64, MirrorError>;

    async fn list_networks(&self, connection_id: i64) -> Result<Vec<CachedNetwork>, MirrorError>;

    async fn upsert_device(
        &self,
        connection_id: i64,
        network_external_id: &str,
        device: &ProviderDevice,
        synced_at: DateTime<Utc>,
    ) -> Result<(), MirrorError>;

    async fn soft_delete_devices_absent(
        &self,
        connection_id: i64,
        network_external_id: &str,
        seen_external_ids: &[String],
    ) -> Result<u64, MirrorError>;

    async fn list_devices(&self, connection_id: i64) -> Result<Vec<CachedDevice>, MirrorError>;

    /// `NotStarted` when no row exists yet.
    async fn get_sync_status(&self, connection_id: i64) -> Result<SyncStatus, MirrorError>;

    async fn put_sync_status(&self, status: &SyncStatus) -> Result<(), MirrorError>;

    /// Physically removes every cached row and the status row for the
    /// connection. Only the disconnect command calls this.
    async fn purge_connection(&self, connection_id: i64) -> Result<(), MirrorError>;
}

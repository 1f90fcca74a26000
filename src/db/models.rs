use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant's configured link to one external integration account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    pub id: i64,
    pub owner: String,
    pub display_name: String,
    pub connector_type: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The long-lived refresh grant for one connection. Access tokens are never
/// persisted; only this row survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub connection_id: i64,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedOrganization {
    pub id: i64,
    pub connection_id: i64,
    pub external_id: String,
    pub name: String,
    pub url: Option<String>,
    pub is_deleted: bool,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedNetwork {
    pub id: i64,
    pub connection_id: i64,
    pub external_id: String,
    pub organization_external_id: String,
    pub name: String,
    pub time_zone: Option<String>,
    pub tags: Vec<String>,
    pub is_deleted: bool,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedDevice {
    pub id: i64,
    pub connection_id: i64,
    /// Device serial; the provider's stable identifier.
    pub external_id: String,
    pub network_external_id: String,
    pub name: Option<String>,
    pub model: Option<String>,
    pub mac: Option<String>,
    pub firmware: Option<String>,
    pub is_deleted: bool,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

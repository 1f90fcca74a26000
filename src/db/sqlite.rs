use crate::db::models::{CachedDevice, CachedNetwork, CachedOrganization, Connection, Credential};
use crate::db::schema::SQLITE_INIT;
use crate::db::{ConnectionDataCache, CredentialStore};
use crate::error::MirrorError;
use crate::types::{
    ProviderDevice, ProviderNetwork, ProviderOrganization, SyncState, SyncStatus,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashSet;
use std::str::FromStr;

pub type SqlitePool = Pool<Sqlite>;

/// SQLite-backed implementation of both storage contracts.
#[derive(Clone)]
pub struct MirrorStorage {
    pool: SqlitePool,
}

impl MirrorStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open (creating if missing) and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, MirrorError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)
            .map_err(MirrorError::Persistence)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(connect_opts).await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), MirrorError> {
        // execute multiple statements safely (SQLite supports multi-commands but sqlx::query doesn't)
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn insert_connection(
        &self,
        owner: &str,
        display_name: &str,
        connector_type: &str,
    ) -> Result<Connection, MirrorError> {
        let now = Utc::now();
        let res = sqlx::query(
            r#"INSERT INTO connections (owner, display_name, connector_type, active, created_at, updated_at)
               VALUES (?, ?, ?, 1, ?, ?)"#,
        )
        .bind(owner)
        .bind(display_name)
        .bind(connector_type)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Connection {
            id: res.last_insert_rowid(),
            owner: owner.to_string(),
            display_name: display_name.to_string(),
            connector_type: connector_type.to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_connection(&self, id: i64) -> Result<Option<Connection>, MirrorError> {
        let row = sqlx::query(
            r#"SELECT id, owner, display_name, connector_type, active, created_at, updated_at
               FROM connections WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_connection).transpose()
    }

    pub async fn set_connection_active(&self, id: i64, active: bool) -> Result<(), MirrorError> {
        let active_i = if active { 1 } else { 0 };
        let now = Utc::now();
        sqlx::query("UPDATE connections SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active_i)
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MirrorStorage {
    async fn get_credential(&self, connection_id: i64) -> Result<Option<Credential>, MirrorError> {
        let row = sqlx::query(
            r#"SELECT connection_id, refresh_token, refresh_expires_at, created_at, updated_at
               FROM credentials WHERE connection_id = ?"#,
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_credential).transpose()
    }

    async fn upsert_credential(&self, credential: &Credential) -> Result<(), MirrorError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (
                connection_id, refresh_token, refresh_expires_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(connection_id) DO UPDATE SET
                refresh_token=excluded.refresh_token,
                refresh_expires_at=excluded.refresh_expires_at,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(credential.connection_id)
        .bind(&credential.refresh_token)
        .bind(credential.refresh_expires_at.to_rfc3339())
        .bind(credential.created_at.to_rfc3339())
        .bind(credential.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_credential(&self, connection_id: i64) -> Result<(), MirrorError> {
        sqlx::query("DELETE FROM credentials WHERE connection_id = ?")
            .bind(connection_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_syncable(&self, now: DateTime<Utc>) -> Result<Vec<i64>, MirrorError> {
        let rows = sqlx::query(
            r#"SELECT c.connection_id, c.refresh_expires_at
               FROM credentials c
               JOIN connections n ON n.id = c.connection_id
               WHERE n.active = 1
               ORDER BY c.connection_id"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("connection_id")?;
            let expires_at: String = row.try_get("refresh_expires_at")?;
            if parse_ts(&expires_at)? > now {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl ConnectionDataCache for MirrorStorage {
    async fn upsert_organization(
        &self,
        connection_id: i64,
        org: &ProviderOrganization,
        synced_at: DateTime<Utc>,
    ) -> Result<(), MirrorError> {
        sqlx::query(
            r#"
            INSERT INTO cached_organizations (
                connection_id, external_id, name, url, is_deleted, last_synced_at, created_at
            ) VALUES (?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(connection_id, external_id) DO UPDATE SET
                name=excluded.name,
                url=excluded.url,
                is_deleted=0,
                last_synced_at=excluded.last_synced_at
            "#,
        )
        .bind(connection_id)
        .bind(&org.id)
        .bind(&org.name)
        .bind(org.url.clone())
        .bind(synced_at.to_rfc3339())
        .bind(synced_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn soft_delete_organizations_absent(
        &self,
        connection_id: i64,
        seen_external_ids: &[String],
    ) -> Result<u64, MirrorError> {
        let rows = sqlx::query(
            "SELECT external_id FROM cached_organizations WHERE connection_id = ? AND is_deleted = 0",
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;
        self.flag_absent("cached_organizations", connection_id, rows, seen_external_ids)
            .await
    }

    async fn list_organizations(
        &self,
        connection_id: i64,
    ) -> Result<Vec<CachedOrganization>, MirrorError> {
        let rows = sqlx::query(
            r#"SELECT id, connection_id, external_id, name, url, is_deleted, last_synced_at, created_at
               FROM cached_organizations WHERE connection_id = ? ORDER BY external_id"#,
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_organization).collect()
    }

    async fn upsert_network(
        &self,
        connection_id: i64,
        organization_external_id: &str,
        network: &ProviderNetwork,
        synced_at: DateTime<Utc>,
    ) -> Result<(), MirrorError> {
        let tags_json = serde_json::to_string(&network.tags)?;
        sqlx::query(
            r#"
            INSERT INTO cached_networks (
                connection_id, external_id, organization_external_id, name,
                time_zone, tags, is_deleted, last_synced_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(connection_id, external_id) DO UPDATE SET
                organization_external_id=excluded.organization_external_id,
                name=excluded.name,
                time_zone=excluded.time_zone,
                tags=excluded.tags,
                is_deleted=0,
                last_synced_at=excluded.last_synced_at
            "#,
        )
        .bind(connection_id)
        .bind(&network.id)
        .bind(organization_external_id)
        .bind(&network.name)
        .bind(network.time_zone.clone())
        .bind(tags_json)
        .bind(synced_at.to_rfc3339())
        .bind(synced_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn soft_delete_networks_absent(
        &self,
        connection_id: i64,
        organization_external_id: &str,
        seen_external_ids: &[String],
    ) -> Result<u64, MirrorError> {
        let rows = sqlx::query(
            r#"SELECT external_id FROM cached_networks
               WHERE connection_id = ? AND organization_external_id = ? AND is_deleted = 0"#,
        )
        .bind(connection_id)
        .bind(organization_external_id)
        .fetch_all(&self.pool)
        .await?;
        self.flag_absent("cached_networks", connection_id, rows, seen_external_ids)
            .await
    }

    async fn list_networks(&self, connection_id: i64) -> Result<Vec<CachedNetwork>, MirrorError> {
        let rows = sqlx::query(
            r#"SELECT id, connection_id, external_id, organization_external_id, name,
                      time_zone, tags, is_deleted, last_synced_at, created_at
               FROM cached_networks WHERE connection_id = ? ORDER BY external_id"#,
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_network).collect()
    }

    async fn upsert_device(
        &self,
        connection_id: i64,
        network_external_id: &str,
        device: &ProviderDevice,
        synced_at: DateTime<Utc>,
    ) -> Result<(), MirrorError> {
        sqlx::query(
            r#"
            INSERT INTO cached_devices (
                connection_id, external_id, network_external_id, name,
                model, mac, firmware, is_deleted, last_synced_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(connection_id, external_id) DO UPDATE SET
                network_external_id=excluded.network_external_id,
                name=excluded.name,
                model=excluded.model,
                mac=excluded.mac,
                firmware=excluded.firmware,
                is_deleted=0,
                last_synced_at=excluded.last_synced_at
            "#,
        )
        .bind(connection_id)
        .bind(&device.serial)
        .bind(network_external_id)
        .bind(device.name.clone())
        .bind(device.model.clone())
        .bind(device.mac.clone())
        .bind(device.firmware.clone())
        .bind(synced_at.to_rfc3339())
        .bind(synced_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn soft_delete_devices_absent(
        &self,
        connection_id: i64,
        network_external_id: &str,
        seen_external_ids: &[String],
    ) -> Result<u64, MirrorError> {
        let rows = sqlx::query(
            r#"SELECT external_id FROM cached_devices
               WHERE connection_id = ? AND network_external_id = ? AND is_deleted = 0"#,
        )
        .bind(connection_id)
        .bind(network_external_id)
        .fetch_all(&self.pool)
        .await?;
        self.flag_absent("cached_devices", connection_id, rows, seen_external_ids)
            .await
    }

    async fn list_devices(&self, connection_id: i64) -> Result<Vec<CachedDevice>, MirrorError> {
        let rows = sqlx::query(
            r#"SELECT id, connection_id, external_id, network_external_id, name,
                      model, mac, firmware, is_deleted, last_synced_at, created_at
               FROM cached_devices WHERE connection_id = ? ORDER BY external_id"#,
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_device).collect()
    }

    async fn get_sync_status(&self, connection_id: i64) -> Result<SyncStatus, MirrorError> {
        let row = sqlx::query(
            r#"SELECT connection_id, state, current_step, step_number, total_steps,
                      error, started_at, finished_at
               FROM sync_status WHERE connection_id = ?"#,
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_status(row),
            None => Ok(SyncStatus::not_started(connection_id)),
        }
    }

    async fn put_sync_status(&self, status: &SyncStatus) -> Result<(), MirrorError> {
        let (state, current_step, step_number, total_steps, error, finished_at) =
            match &status.state {
                SyncState::NotStarted => ("not_started", None, None, None, None, None),
                SyncState::InProgress {
                    current_step,
                    step_number,
                    total_steps,
                } => (
                    "in_progress",
                    Some(current_step.clone()),
                    Some(*step_number as i64),
                    Some(*total_steps as i64),
                    None,
                    None,
                ),
                SyncState::Completed { completed_at } => (
                    "completed",
                    None,
                    None,
                    None,
                    None,
                    Some(completed_at.to_rfc3339()),
                ),
                SyncState::Failed { error, failed_at } => (
                    "failed",
                    None,
                    None,
                    None,
                    Some(error.clone()),
                    Some(failed_at.to_rfc3339()),
                ),
            };

        sqlx::query(
            r#"
            INSERT INTO sync_status (
                connection_id, state, current_step, step_number, total_steps,
                error, started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(connection_id) DO UPDATE SET
                state=excluded.state,
                current_step=excluded.current_step,
                step_number=excluded.step_number,
                total_steps=excluded.total_steps,
                error=excluded.error,
                started_at=excluded.started_at,
                finished_at=excluded.finished_at
            "#,
        )
        .bind(status.connection_id)
        .bind(state)
        .bind(current_step)
        .bind(step_number)
        .bind(total_steps)
        .bind(error)
        .bind(status.started_at.map(|t| t.to_rfc3339()))
        .bind(finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_connection(&self, connection_id: i64) -> Result<(), MirrorError> {
        for table in [
            "cached_devices",
            "cached_networks",
            "cached_organizations",
            "sync_status",
        ] {
            sqlx::query(&format!("DELETE FROM {} WHERE connection_id = ?", table))
                .bind(connection_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

impl MirrorStorage {
    /// Flags every live row at the already-filtered scope whose external id is
    /// missing from `seen`. Each update commits independently.
    async fn flag_absent(
        &self,
        table: &str,
        connection_id: i64,
        scope_rows: Vec<SqliteRow>,
        seen: &[String],
    ) -> Result<u64, MirrorError> {
        let seen: HashSet<&str> = seen.iter().map(String::as_str).collect();
        let mut flagged = 0u64;
        for row in scope_rows {
            let external_id: String = row.try_get("external_id")?;
            if seen.contains(external_id.as_str()) {
                continue;
            }
            let res = sqlx::query(&format!(
                "UPDATE {} SET is_deleted = 1 WHERE connection_id = ? AND external_id = ?",
                table
            ))
            .bind(connection_id)
            .bind(&external_id)
            .execute(&self.pool)
            .await?;
            flagged += res.rows_affected();
        }
        Ok(flagged)
    }
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, MirrorError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| MirrorError::Persistence(sqlx::Error::Decode(Box::new(e))))
}

fn row_to_connection(row: SqliteRow) -> Result<Connection, MirrorError> {
    let active_i: i64 = row.try_get("active")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Connection {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        display_name: row.try_get("display_name")?,
        connector_type: row.try_get("connector_type")?,
        active: active_i != 0,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn row_to_credential(row: SqliteRow) -> Result<Credential, MirrorError> {
    let refresh_expires_at: String = row.try_get("refresh_expires_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Credential {
        connection_id: row.try_get("connection_id")?,
        refresh_token: row.try_get("refresh_token")?,
        refresh_expires_at: parse_ts(&refresh_expires_at)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn row_to_organization(row: SqliteRow) -> Result<CachedOrganization, MirrorError> {
    let is_deleted: i64 = row.try_get("is_deleted")?;
    let last_synced_at: String = row.try_get("last_synced_at")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(CachedOrganization {
        id: row.try_get("id")?,
        connection_id: row.try_get("connection_id")?,
        external_id: row.try_get("external_id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        is_deleted: is_deleted != 0,
        last_synced_at: parse_ts(&last_synced_at)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn row_to_network(row: SqliteRow) -> Result<CachedNetwork, MirrorError> {
    let is_deleted: i64 = row.try_get("is_deleted")?;
    let last_synced_at: String = row.try_get("last_synced_at")?;
    let created_at: String = row.try_get("created_at")?;
    let tags_json: Option<String> = row.try_get("tags")?;
    let tags: Vec<String> = match tags_json {
        Some(s) => serde_json::from_str(&s)
            .map_err(|e| MirrorError::Persistence(sqlx::Error::Decode(Box::new(e))))?,
        None => Vec::new(),
    };
    Ok(CachedNetwork {
        id: row.try_get("id")?,
        connection_id: row.try_get("connection_id")?,
        external_id: row.try_get("external_id")?,
        organization_external_id: row.try_get("organization_external_id")?,
        name: row.try_get("name")?,
        time_zone: row.try_get("time_zone")?,
        tags,
        is_deleted: is_deleted != 0,
        last_synced_at: parse_ts(&last_synced_at)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn row_to_device(row: SqliteRow) -> Result<CachedDevice, MirrorError> {
    let is_deleted: i64 = row.try_get("is_deleted")?;
    let last_synced_at: String = row.try_get("last_synced_at")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(CachedDevice {
        id: row.try_get("id")?,
        connection_id: row.try_get("connection_id")?,
        external_id: row.try_get("external_id")?,
        network_external_id: row.try_get("network_external_id")?,
        name: row.try_get("name")?,
        model: row.try_get("model")?,
        mac: row.try_get("mac")?,
        firmware: row.try_get("firmware")?,
        is_deleted: is_deleted != 0,
        last_synced_at: parse_ts(&last_synced_at)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn row_to_status(row: SqliteRow) -> Result<SyncStatus, MirrorError> {
    let connection_id: i64 = row.try_get("connection_id")?;
    let state: String = row.try_get("state")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let finished_at: Option<String> = row.try_get("finished_at")?;

    let finished = finished_at.as_deref().map(parse_ts).transpose()?;
    let state = match state.as_str() {
        "not_started" => SyncState::NotStarted,
        "in_progress" => {
            let current_step: Option<String> = row.try_get("current_step")?;
            let step_number: Option<i64> = row.try_get("step_number")?;
            let total_steps: Option<i64> = row.try_get("total_steps")?;
            SyncState::InProgress {
                current_step: current_step.unwrap_or_default(),
                step_number: step_number.unwrap_or(0) as u8,
                total_steps: total_steps.unwrap_or(0) as u8,
            }
        }
        "completed" => SyncState::Completed {
            completed_at: finished.ok_or_else(|| {
                MirrorError::Persistence(sqlx::Error::Decode(
                    "completed status row without finished_at".into(),
                ))
            })?,
        },
        "failed" => {
            let error: Option<String> = row.try_get("error")?;
            SyncState::Failed {
                error: error.unwrap_or_else(|| "unknown error".to_string()),
                failed_at: finished.ok_or_else(|| {
                    MirrorError::Persistence(sqlx::Error::Decode(
                        "failed status row without finished_at".into(),
                    ))
                })?,
            }
        }
        other => {
            return Err(MirrorError::Persistence(sqlx::Error::Decode(
                format!("unknown sync state {:?}", other).into(),
            )));
        }
    };

    Ok(SyncStatus {
        connection_id,
        state,
        started_at: started_at.as_deref().map(parse_ts).transpose()?,
    })
}

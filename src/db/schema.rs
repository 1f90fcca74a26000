//! SQL DDL for the mirror database.
//! SQLite-first design; can be adapted for other RDBMS.

/// Schema notes:
/// - instants are RFC3339 TEXT, booleans INTEGER 0/1
/// - `credentials` and `sync_status` are one-per-connection (UNIQUE connection_id)
/// - cached rows are keyed by (connection_id, external_id); parent linkage uses
///   the parent's external id so identity survives re-sync
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    display_name TEXT NOT NULL,
    connector_type TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    connection_id INTEGER NOT NULL UNIQUE,
    refresh_token TEXT NOT NULL,
    refresh_expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cached_organizations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    connection_id INTEGER NOT NULL,
    external_id TEXT NOT NULL,
    name TEXT NOT NULL,
    url TEXT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(connection_id, external_id)
);

CREATE TABLE IF NOT EXISTS cached_networks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    connection_id INTEGER NOT NULL,
    external_id TEXT NOT NULL,
    organization_external_id TEXT NOT NULL,
    name TEXT NOT NULL,
    time_zone TEXT NULL,
    tags TEXT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(connection_id, external_id)
);

CREATE TABLE IF NOT EXISTS cached_devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    connection_id INTEGER NOT NULL,
    external_id TEXT NOT NULL,
    network_external_id TEXT NOT NULL,
    name TEXT NULL,
    model TEXT NULL,
    mac TEXT NULL,
    firmware TEXT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(connection_id, external_id)
);

CREATE TABLE IF NOT EXISTS sync_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    connection_id INTEGER NOT NULL UNIQUE,
    state TEXT NOT NULL DEFAULT 'not_started',
    current_step TEXT NULL,
    step_number INTEGER NULL,
    total_steps INTEGER NULL,
    error TEXT NULL,
    started_at TEXT NULL,
    finished_at TEXT NULL
);

CREATE INDEX IF NOT EXISTS idx_cached_networks_parent
    ON cached_networks(connection_id, organization_external_id);
CREATE INDEX IF NOT EXISTS idx_cached_devices_parent
    ON cached_devices(connection_id, network_external_id);
"#;

//! Runtime configuration, merged from defaults and `NETMIRROR_*` environment
//! variables (figment). Nothing here is hardcoded at use sites; every component
//! receives its slice of the config at construction.

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database URL, e.g. `sqlite:netmirror.sqlite`.
    pub database_url: String,
    /// Fallback log filter when RUST_LOG is unset.
    pub loglevel: String,
    pub provider: ProviderConfig,
    pub sync: SyncConfig,
}

/// Endpoints and limits for the delegated-auth provider and the inventory API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub auth_url: Url,
    pub token_url: Url,
    pub api_base_url: Url,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: Url,
    /// Per-request timeout for provider calls, seconds.
    pub timeout_secs: u64,
    /// Retry budget for one logical provider call.
    pub max_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Master switch for the background scheduler.
    pub background_enabled: bool,
    /// Interval between scheduler ticks, seconds.
    pub interval_secs: u64,
    /// Warm-up delay after process start before the first tick, seconds.
    pub startup_delay_secs: u64,
    /// Access tokens within this many seconds of expiry are refreshed eagerly.
    pub token_expiry_buffer_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:netmirror.sqlite".to_string(),
            loglevel: "info".to_string(),
            provider: ProviderConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            auth_url: Url::parse("https://dashboard.invgrid.example/oauth/authorize")
                .expect("default auth_url is valid"),
            token_url: Url::parse("https://dashboard.invgrid.example/oauth/token")
                .expect("default token_url is valid"),
            api_base_url: Url::parse("https://api.invgrid.example/v1/")
                .expect("default api_base_url is valid"),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: Url::parse("http://localhost:8000/oauth/callback")
                .expect("default redirect_url is valid"),
            timeout_secs: 15,
            max_attempts: 3,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            background_enabled: true,
            interval_secs: 900,
            startup_delay_secs: 30,
            token_expiry_buffer_secs: 300,
        }
    }
}

impl Config {
    /// Defaults overlaid with `NETMIRROR_*` env vars; nested fields use `__`,
    /// e.g. `NETMIRROR_SYNC__INTERVAL_SECS=60`.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("NETMIRROR_").split("__"))
            .extract()
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn token_expiry_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_expiry_buffer_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.sync.background_enabled);
        assert_eq!(cfg.sync.token_expiry_buffer_secs, 300);
        assert_eq!(cfg.provider.max_attempts, 3);
        assert!(cfg.database_url.starts_with("sqlite:"));
    }
}

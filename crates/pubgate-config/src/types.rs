//! Configuration type definitions for the user store and logging.

use std::collections::HashMap;
use std::time::Duration;

use pubgate_auth::{HashCost, ManagerConfig, Permission};
use serde::{Deserialize, Serialize};

use crate::defaults::*;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// User store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Database URL, e.g. `sqlite:/var/lib/pubgate/user.db`.
    #[serde(default = "default_database")]
    pub database: String,
    /// Create the database file when missing.
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Permission applied to topics no grant matches.
    #[serde(default = "default_access")]
    pub default_access: Permission,
    /// Statements run once after the store is opened (e.g. pragmas).
    #[serde(default)]
    pub startup_queries: Vec<String>,
    #[serde(default = "default_stats_flush_interval_secs")]
    pub stats_flush_interval_secs: u64,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_token_max_count")]
    pub token_max_count: u32,
    /// Interval of the expired token sweep run by `pubgate maintain`.
    #[serde(default = "default_token_sweep_interval_secs")]
    pub token_sweep_interval_secs: u64,
    /// Argon2id cost for new password hashes. Existing hashes keep their own.
    #[serde(default)]
    pub hash: HashCost,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            create_if_missing: default_create_if_missing(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            default_access: default_access(),
            startup_queries: Vec::new(),
            stats_flush_interval_secs: default_stats_flush_interval_secs(),
            token_ttl_secs: default_token_ttl_secs(),
            token_max_count: default_token_max_count(),
            token_sweep_interval_secs: default_token_sweep_interval_secs(),
            hash: HashCost::default(),
        }
    }
}

impl AuthConfig {
    /// Build the manager configuration for this section.
    pub fn manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::new(&self.database)
            .create_if_missing(self.create_if_missing)
            .max_connections(self.max_connections)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .default_access(self.default_access)
            .stats_flush_interval(Duration::from_secs(self.stats_flush_interval_secs))
            .token_ttl(Duration::from_secs(self.token_ttl_secs))
            .token_max_count(self.token_max_count)
            .hash_cost(self.hash);
        for query in &self.startup_queries {
            config = config.startup_query(query);
        }
        config
    }

    pub fn token_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.token_sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    pub output: Option<String>,
    /// Per-module log level filters (e.g., {"pubgate_auth": "debug", "sqlx": "warn"}).
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

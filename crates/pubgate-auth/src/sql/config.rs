//! Manager configuration.

use std::time::Duration;

use crate::hash::HashCost;
use crate::permission::Permission;

/// Default interval between two usage stats flushes.
pub const DEFAULT_STATS_FLUSH_INTERVAL: Duration = Duration::from_secs(33);

/// Default bearer token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(72 * 60 * 60);

/// Default number of tokens kept per user.
pub const DEFAULT_TOKEN_MAX_COUNT: u32 = 20;

/// Configuration for the SQLite-backed [`Manager`](super::Manager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Database connection URL.
    ///
    /// Examples: `sqlite:path/to/user.db` or `sqlite::memory:`
    pub database_url: String,

    /// Create the database file if it does not exist.
    pub create_if_missing: bool,

    /// Maximum number of connections in the pool. In-memory databases always use one.
    pub max_connections: u32,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Permission applied when no grant matches.
    pub default_access: Permission,

    /// Statements executed once after the store is opened, e.g. pragmas.
    pub startup_queries: Vec<String>,

    /// Interval between usage stats flushes.
    pub stats_flush_interval: Duration,

    /// Lifetime of new and extended tokens.
    pub token_ttl: Duration,

    /// Maximum number of tokens kept per user.
    pub token_max_count: u32,

    /// Password hashing cost.
    pub hash_cost: HashCost,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            create_if_missing: true,
            max_connections: 5,
            connect_timeout: Duration::from_secs(30),
            default_access: Permission::ReadWrite,
            startup_queries: Vec::new(),
            stats_flush_interval: DEFAULT_STATS_FLUSH_INTERVAL,
            token_ttl: DEFAULT_TOKEN_TTL,
            token_max_count: DEFAULT_TOKEN_MAX_COUNT,
            hash_cost: HashCost::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a new config with just the database URL.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    /// Whether the URL points to an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }

    /// Builder: set max connections.
    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    /// Builder: set connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: create the database file if missing.
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Builder: set the default permission.
    pub fn default_access(mut self, permission: Permission) -> Self {
        self.default_access = permission;
        self
    }

    /// Builder: add a statement to run after opening the store.
    pub fn startup_query(mut self, query: impl Into<String>) -> Self {
        self.startup_queries.push(query.into());
        self
    }

    /// Builder: set stats flush interval.
    pub fn stats_flush_interval(mut self, interval: Duration) -> Self {
        self.stats_flush_interval = interval;
        self
    }

    /// Builder: set token lifetime.
    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Builder: set max tokens per user.
    pub fn token_max_count(mut self, n: u32) -> Self {
        self.token_max_count = n;
        self
    }

    /// Builder: set password hashing cost.
    pub fn hash_cost(mut self, cost: HashCost) -> Self {
        self.hash_cost = cost;
        self
    }
}

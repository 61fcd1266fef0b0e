//! Configuration loading and CLI definitions.
//!
//! # Example
//!
//! ```toml
//! [auth]
//! database = "sqlite:/var/lib/pubgate/user.db"
//! default_access = "deny-all"
//! startup_queries = ["PRAGMA journal_mode = WAL"]
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

mod cli;
mod defaults;
mod loader;
mod types;
mod validate;

pub use cli::{CliOverrides, apply_overrides};
pub use defaults::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_DATABASE, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_TOKEN_SWEEP_INTERVAL_SECS,
};
pub use loader::{ConfigError, load_config};
pub use types::{AuthConfig, Config, LoggingConfig};
pub use validate::{MAX_INTERVAL_SECS, MAX_TOKEN_TTL_SECS, validate_config};

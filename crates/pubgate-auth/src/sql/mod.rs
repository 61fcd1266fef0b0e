//! SQLite store for users, grants, tokens and tiers.
//!
//! The store is opened through [`Manager::connect`], which creates a fresh schema or
//! migrates an older one in place before anything else touches it.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use pubgate_auth::sql::{Manager, ManagerConfig};
//! use pubgate_auth::{Permission, Role};
//!
//! let config = ManagerConfig::new("sqlite:user.db")
//!     .default_access(Permission::DenyAll)
//!     .stats_flush_interval(Duration::from_secs(10));
//! let manager = Manager::connect(config).await?;
//!
//! manager.add_user("ben", "secret", Role::User).await?;
//! manager.allow_access(None, "ben", "alerts*", Permission::ReadWrite).await?;
//! ```
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE user (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,  -- 1 is Everyone ('*')
//!     plan_id INT REFERENCES plan (id),
//!     name TEXT NOT NULL UNIQUE,
//!     password_hash TEXT NOT NULL,           -- argon2 PHC string
//!     role TEXT NOT NULL,                    -- admin, user or anonymous
//!     messages INT, emails INT, calls INT,
//!     settings TEXT,                         -- JSON
//!     created INT NOT NULL
//! );
//! CREATE TABLE user_access (
//!     user_id INT, topic_pattern TEXT, read INT, write INT,
//!     owner_user_id INT,                     -- set for reservations
//!     PRIMARY KEY (user_id, topic_pattern)
//! );
//! CREATE TABLE user_token (user_id INT, token TEXT UNIQUE, expires INT);
//! CREATE TABLE plan (id INTEGER PRIMARY KEY, code TEXT UNIQUE, name TEXT, ...limits);
//! CREATE TABLE schema_version (id INT PRIMARY KEY, version INT);
//! ```

mod access;
mod config;
mod manager;
mod queries;
mod schema;
mod stats;
mod tiers;
mod tokens;

#[cfg(test)]
mod tests;

pub use config::{
    DEFAULT_STATS_FLUSH_INTERVAL, DEFAULT_TOKEN_MAX_COUNT, DEFAULT_TOKEN_TTL, ManagerConfig,
};
pub use manager::Manager;
pub(crate) use manager::now_unix;
pub use schema::CURRENT_VERSION as SCHEMA_VERSION;
pub use stats::{FlushFn, FlushFuture, StatsQueue};
pub use tokens::{TOKEN_LENGTH, TOKEN_PREFIX, generate_token};

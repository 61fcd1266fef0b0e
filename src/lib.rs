//! # pubgate
//!
//! Identity, access control and usage accounting core for a pub/sub
//! notification service.
//!
//! ## Crates
//!
//! - [`pubgate_auth`] - Users, topic grants, tokens, tiers and the SQLite store
//! - [`pubgate_config`] - Configuration loading and validation

pub use pubgate_auth as auth;
pub use pubgate_config as config;

pub mod maintain;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use pubgate_auth::{Auther, AuthError, Manager, ManagerConfig, Permission, Role, User};
    pub use pubgate_config::{Config, load_config, validate_config};
}

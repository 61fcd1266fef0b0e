//! Identity, access control and usage accounting for pubgate.
//!
//! This crate authenticates users (password or bearer token), authorizes topic
//! reads and writes against wildcard grants, issues and sweeps tokens, batches usage
//! counters, and keeps its SQLite schema up to date.
//!
//! # Example
//!
//! ```
//! use pubgate_auth::acl::TopicPattern;
//! use pubgate_auth::Permission;
//!
//! assert!(TopicPattern::new("alerts*").matches("alerts-prod"));
//! assert!(Permission::ReadWrite.is_write());
//! ```

pub mod acl;
pub mod cli;
mod error;
mod hash;
mod permission;
pub mod sql;
mod traits;
mod user;
pub mod validate;

pub use error::{AuthError, ErrorKind};
pub use hash::{HashCost, hash_password, verify_password};
pub use permission::Permission;
pub use sql::{Manager, ManagerConfig};
pub use traits::Auther;
pub use user::{
    Grant, NotificationSettings, Reservation, Role, Settings, Stats, Subscription, Tier, Token,
    User,
};
pub use validate::EVERYONE;

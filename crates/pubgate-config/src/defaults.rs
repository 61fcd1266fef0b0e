//! Default value functions for serde deserialization.
//!
//! Store-related defaults forward to the constants exported by `pubgate_auth::sql`.

use pubgate_auth::{Permission, sql};

/// Default store location.
pub const DEFAULT_DATABASE: &str = "sqlite:user.db";

/// Default pool size for file-backed stores.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default interval between expired token sweeps.
pub const DEFAULT_TOKEN_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Generate default value functions that forward to constants.
macro_rules! default_fns {
    ($($fn_name:ident => $value:expr ; $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                $value
            }
        )*
    };
}

default_fns! {
    default_database                  => DEFAULT_DATABASE.to_string(); String,
    default_max_connections           => DEFAULT_MAX_CONNECTIONS; u32,
    default_connect_timeout_secs      => DEFAULT_CONNECT_TIMEOUT_SECS; u64,
    default_create_if_missing         => true; bool,
    default_access                    => Permission::ReadWrite; Permission,
    default_stats_flush_interval_secs => sql::DEFAULT_STATS_FLUSH_INTERVAL.as_secs(); u64,
    default_token_ttl_secs            => sql::DEFAULT_TOKEN_TTL.as_secs(); u64,
    default_token_max_count           => sql::DEFAULT_TOKEN_MAX_COUNT; u32,
    default_token_sweep_interval_secs => DEFAULT_TOKEN_SWEEP_INTERVAL_SECS; u64,
}

//! CLI override definitions and application logic.

use clap::Parser;
use pubgate_auth::Permission;

use crate::Config;

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Override database URL, e.g. sqlite:/var/lib/pubgate/user.db
    #[arg(long)]
    pub database: Option<String>,
    /// Override default access (read-write, read-only, write-only, deny-all)
    #[arg(long)]
    pub default_access: Option<Permission>,
    /// Override maximum pool connections
    #[arg(long)]
    pub max_connections: Option<u32>,
    /// Override stats flush interval (seconds)
    #[arg(long)]
    pub stats_flush_interval_secs: Option<u64>,
    /// Override token lifetime (seconds)
    #[arg(long)]
    pub token_ttl_secs: Option<u64>,
    /// Override maximum tokens per user
    #[arg(long)]
    pub token_max_count: Option<u32>,
    /// Override expired token sweep interval (seconds)
    #[arg(long)]
    pub token_sweep_interval_secs: Option<u64>,
    /// Add startup queries (repeatable)
    #[arg(long)]
    pub startup_query: Vec<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
    /// Override log format (json/pretty/compact)
    #[arg(long)]
    pub log_format: Option<String>,
}

pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(v) = &overrides.database {
        config.auth.database = v.clone();
    }
    if let Some(v) = overrides.default_access {
        config.auth.default_access = v;
    }
    if let Some(v) = overrides.max_connections {
        config.auth.max_connections = v;
    }
    if let Some(v) = overrides.stats_flush_interval_secs {
        config.auth.stats_flush_interval_secs = v;
    }
    if let Some(v) = overrides.token_ttl_secs {
        config.auth.token_ttl_secs = v;
    }
    if let Some(v) = overrides.token_max_count {
        config.auth.token_max_count = v;
    }
    if let Some(v) = overrides.token_sweep_interval_secs {
        config.auth.token_sweep_interval_secs = v;
    }
    config
        .auth
        .startup_queries
        .extend(overrides.startup_query.iter().cloned());
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
    if let Some(v) = &overrides.log_format {
        config.logging.format = Some(v.clone());
    }
}

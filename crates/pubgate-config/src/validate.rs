//! Configuration validation logic.

use crate::Config;
use crate::loader::ConfigError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 3] = ["json", "pretty", "compact"];
const LOG_OUTPUTS: [&str; 2] = ["stdout", "stderr"];

/// Upper bound for token lifetimes: ten years.
pub const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;
/// Upper bound for timer intervals: one week.
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let auth = &config.auth;
    if auth.database.trim().is_empty() {
        return Err(ConfigError::Validation("auth.database is empty".into()));
    }
    if !auth.database.starts_with("sqlite:") {
        return Err(ConfigError::Validation(
            "auth.database must be a sqlite: URL".into(),
        ));
    }
    if auth.max_connections == 0 {
        return Err(ConfigError::Validation(
            "auth.max_connections must be > 0".into(),
        ));
    }
    if auth.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "auth.connect_timeout_secs must be > 0".into(),
        ));
    }
    if !(1..=MAX_INTERVAL_SECS).contains(&auth.stats_flush_interval_secs) {
        return Err(ConfigError::Validation(format!(
            "auth.stats_flush_interval_secs must be in 1..={MAX_INTERVAL_SECS}"
        )));
    }
    if !(1..=MAX_TOKEN_TTL_SECS).contains(&auth.token_ttl_secs) {
        return Err(ConfigError::Validation(format!(
            "auth.token_ttl_secs must be in 1..={MAX_TOKEN_TTL_SECS}"
        )));
    }
    if auth.token_max_count == 0 {
        return Err(ConfigError::Validation(
            "auth.token_max_count must be > 0".into(),
        ));
    }
    if !(1..=MAX_INTERVAL_SECS).contains(&auth.token_sweep_interval_secs) {
        return Err(ConfigError::Validation(format!(
            "auth.token_sweep_interval_secs must be in 1..={MAX_INTERVAL_SECS}"
        )));
    }
    if auth.hash.memory_kib < auth.hash.parallelism.saturating_mul(8)
        || auth.hash.iterations == 0
        || auth.hash.parallelism == 0
    {
        return Err(ConfigError::Validation(
            "auth.hash: iterations and parallelism must be > 0, memory_kib >= 8 * parallelism"
                .into(),
        ));
    }

    let logging = &config.logging;
    if let Some(level) = &logging.level
        && !LOG_LEVELS.contains(&level.as_str())
    {
        return Err(ConfigError::Validation(format!(
            "logging.level must be one of: {:?}",
            LOG_LEVELS
        )));
    }
    if let Some(format) = &logging.format
        && !LOG_FORMATS.contains(&format.as_str())
    {
        return Err(ConfigError::Validation(format!(
            "logging.format must be one of: {:?}",
            LOG_FORMATS
        )));
    }
    if let Some(output) = &logging.output
        && !LOG_OUTPUTS.contains(&output.as_str())
    {
        return Err(ConfigError::Validation(format!(
            "logging.output must be one of: {:?}",
            LOG_OUTPUTS
        )));
    }
    for (module, level) in &logging.filters {
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.filters.{module}: unknown level '{level}'"
            )));
        }
    }
    Ok(())
}

//! SQLite-backed user manager.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use tracing::{debug, info, warn};

use crate::acl::{self, ScopedGrant};
use crate::error::{AuthError, is_unique_violation};
use crate::hash::{hash_password_blocking, verify_password_blocking};
use crate::permission::Permission;
use crate::traits::Auther;
use crate::user::{Role, Settings, Stats, Tier, User};
use crate::validate::{self, EVERYONE};

use super::config::ManagerConfig;
use super::queries;
use super::schema;
use super::stats::{FlushFn, StatsQueue};

/// Password verified against the reference hash when a user does not exist.
const REFERENCE_PASSWORD: &str = "reference password, never matches a lookup";

/// Store row id of the Everyone principal.
pub(crate) const EVERYONE_ID: i64 = 1;

/// User, access control, token and tier manager.
///
/// Owns the connection pool and the background stats writer. Share it behind an
/// `Arc` and call [`Manager::close`] on shutdown to flush pending stats.
///
/// # Example
///
/// ```ignore
/// use pubgate_auth::sql::{Manager, ManagerConfig};
/// use pubgate_auth::Permission;
///
/// let config = ManagerConfig::new("sqlite:/var/lib/pubgate/user.db")
///     .default_access(Permission::DenyAll);
/// let manager = Manager::connect(config).await?;
/// ```
pub struct Manager {
    pool: SqlitePool,
    config: ManagerConfig,
    stats: StatsQueue,
    reference_hash: String,
}

impl Manager {
    /// Open (and create or migrate) the store.
    pub async fn connect(config: ManagerConfig) -> Result<Self, AuthError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(config.create_if_missing)
            .foreign_keys(true);

        // Every connection to `:memory:` is a separate database
        let pool_options = SqlitePoolOptions::new().acquire_timeout(config.connect_timeout);
        let pool_options = if config.is_memory() {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(config.max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        Self::from_pool(pool, config).await
    }

    /// Build a manager on an existing pool. Runs schema setup and startup queries.
    pub async fn from_pool(pool: SqlitePool, config: ManagerConfig) -> Result<Self, AuthError> {
        schema::setup(&pool).await?;
        for query in &config.startup_queries {
            for statement in query.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement).execute(&pool).await?;
            }
        }

        let reference_hash =
            hash_password_blocking(REFERENCE_PASSWORD.to_string(), config.hash_cost).await?;

        let pool_clone = pool.clone();
        let flush_fn: FlushFn = Arc::new(move |batch| {
            let pool = pool_clone.clone();
            Box::pin(async move { Self::flush_stats_batch(&pool, batch).await })
        });
        let stats = StatsQueue::new(config.stats_flush_interval, flush_fn);

        info!(
            default_access = %config.default_access,
            stats_interval = ?config.stats_flush_interval,
            "user manager ready"
        );

        Ok(Self {
            pool,
            config,
            stats,
            reference_hash,
        })
    }

    /// Get the connection pool (for advanced usage).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Permission applied when no grant matches.
    pub fn default_access(&self) -> Permission {
        self.config.default_access
    }

    /// Flush pending stats, stop the writer and close the pool.
    pub async fn close(&self) {
        self.stats.close().await;
        self.pool.close().await;
        debug!("user manager closed");
    }

    // Authentication

    /// Check a username/password pair.
    ///
    /// Unknown users cost one hash verification, same as a wrong password.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError> {
        if username == EVERYONE {
            return Err(AuthError::Unauthenticated);
        }
        let user = self.find_user(username).await?;
        let hash = match &user {
            Some(user) => user.hash.clone(),
            None => self.reference_hash.clone(),
        };
        let verified = verify_password_blocking(password.to_string(), hash).await;

        match user {
            Some(user) if verified => Ok(user),
            Some(_) => {
                debug!(user = %username, "authentication failed: wrong password");
                Err(AuthError::Unauthenticated)
            }
            None => {
                debug!(user = %username, "authentication failed: unknown user");
                Err(AuthError::Unauthenticated)
            }
        }
    }

    /// Resolve a bearer token to its user. The returned user carries the token.
    pub async fn authenticate_token(&self, token: &str) -> Result<User, AuthError> {
        if token.len() != super::tokens::TOKEN_LENGTH {
            return Err(AuthError::Unauthenticated);
        }
        let row = sqlx::query(queries::SELECT_USER_BY_TOKEN)
            .bind(token)
            .bind(now_unix())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let mut user = parse_user_row(&row)?;
        user.token = Some(token.to_string());
        Ok(user)
    }

    // Authorization

    /// Check whether `user` (anonymous when `None`) may perform `permission` on `topic`.
    pub async fn authorize(
        &self,
        user: Option<&User>,
        topic: &str,
        permission: Permission,
    ) -> Result<(), AuthError> {
        if user.is_some_and(User::is_admin) {
            return Ok(());
        }
        validate::topic(topic)?;

        let principal = user.map_or(EVERYONE, |u| u.name.as_str());
        let grants = sqlx::query(queries::SELECT_AUTHORIZE_GRANTS)
            .bind(principal)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| -> Result<ScopedGrant, AuthError> {
                Ok(ScopedGrant {
                    everyone: row.try_get::<String, _>("name")? == EVERYONE,
                    topic_pattern: row.try_get("topic_pattern")?,
                    permission: Permission::new(flag(row, "read")?, flag(row, "write")?),
                })
            })
            .collect::<Result<Vec<_>, AuthError>>()?;

        let granted = acl::resolve(&grants, topic).unwrap_or(self.config.default_access);
        if acl::allows(granted, permission) {
            Ok(())
        } else {
            debug!(
                user = %principal,
                topic = %topic,
                requested = %permission,
                granted = %granted,
                "access denied"
            );
            Err(AuthError::Unauthorized)
        }
    }

    // Users

    /// Create a user with the `user` or `admin` role.
    pub async fn add_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<(), AuthError> {
        validate::username(username)?;
        if role == Role::Anonymous {
            return Err(AuthError::invalid("role 'anonymous'"));
        }
        let hash = hash_password_blocking(password.to_string(), self.config.hash_cost).await?;

        sqlx::query(queries::INSERT_USER)
            .bind(username)
            .bind(&hash)
            .bind(role.as_str())
            .bind(now_unix())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AuthError::UserExists
                } else {
                    e.into()
                }
            })?;

        info!(user = %username, role = %role, "added user");
        Ok(())
    }

    /// Delete a user together with its tokens, its grants and the grants it owns.
    ///
    /// Removing a user that does not exist is not an error.
    pub async fn remove_user(&self, username: &str) -> Result<(), AuthError> {
        validate::username(username)?;

        let mut tx = self.pool.begin().await?;
        let Some(user_id) = lookup_user_id(&mut *tx, username).await? else {
            return Ok(());
        };
        sqlx::query(queries::DELETE_USER_TOKENS)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(queries::DELETE_USER_ACCESS)
            .bind(user_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(queries::DELETE_USER)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(user = %username, "removed user");
        Ok(())
    }

    /// All users: admins, then users, then Everyone; by name within a role.
    pub async fn users(&self) -> Result<Vec<User>, AuthError> {
        sqlx::query(queries::SELECT_USERS)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(parse_user_row)
            .collect()
    }

    pub async fn user(&self, username: &str) -> Result<User, AuthError> {
        validate::principal(username)?;
        self.find_user(username).await?.ok_or(AuthError::UserNotFound)
    }

    /// Number of users, Everyone included.
    pub async fn users_count(&self) -> Result<i64, AuthError> {
        let (count,): (i64,) = sqlx::query_as(queries::SELECT_USER_COUNT)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn change_password(&self, username: &str, password: &str) -> Result<(), AuthError> {
        validate::username(username)?;
        let hash = hash_password_blocking(password.to_string(), self.config.hash_cost).await?;

        let result = sqlx::query(queries::UPDATE_USER_PASS)
            .bind(&hash)
            .bind(username)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        info!(user = %username, "changed password");
        Ok(())
    }

    /// Change the role of a user. Promoting to admin drops all of the user's grants.
    pub async fn change_role(&self, username: &str, role: Role) -> Result<(), AuthError> {
        validate::username(username)?;
        if role == Role::Anonymous {
            return Err(AuthError::invalid("role 'anonymous'"));
        }

        let mut tx = self.pool.begin().await?;
        let user_id = lookup_user_id(&mut *tx, username)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        sqlx::query(queries::UPDATE_USER_ROLE)
            .bind(role.as_str())
            .bind(username)
            .execute(&mut *tx)
            .await?;
        if role == Role::Admin {
            sqlx::query(queries::DELETE_USER_ACCESS)
                .bind(user_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(user = %username, role = %role, "changed role");
        Ok(())
    }

    pub async fn change_settings(
        &self,
        username: &str,
        settings: &Settings,
    ) -> Result<(), AuthError> {
        validate::username(username)?;
        let json = serde_json::to_string(settings).map_err(AuthError::backend)?;

        let result = sqlx::query(queries::UPDATE_USER_SETTINGS)
            .bind(&json)
            .bind(username)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }

    // Stats

    /// Queue the user's current counters for the next flush. Never touches the store.
    #[inline]
    pub fn enqueue_stats(&self, user: &User) {
        self.stats.enqueue(&user.name, user.stats);
    }

    /// Zero all counters and drop pending snapshots.
    pub async fn reset_stats(&self) -> Result<(), AuthError> {
        sqlx::query(queries::RESET_USER_STATS)
            .execute(&self.pool)
            .await?;
        self.stats.clear();
        info!("reset user stats");
        Ok(())
    }

    /// Write a batch of stats snapshots in one transaction.
    async fn flush_stats_batch(
        pool: &SqlitePool,
        batch: HashMap<String, Stats>,
    ) -> Result<(), AuthError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = pool.begin().await?;
        for (username, stats) in batch {
            sqlx::query(queries::UPDATE_USER_STATS)
                .bind(stats.messages)
                .bind(stats.emails)
                .bind(stats.calls)
                .bind(&username)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>, AuthError> {
        sqlx::query(queries::SELECT_USER_BY_NAME)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| parse_user_row(&row))
            .transpose()
    }

    /// Id of an existing principal.
    pub(super) async fn user_id(&self, username: &str) -> Result<i64, AuthError> {
        lookup_user_id(&self.pool, username)
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}

#[async_trait]
impl Auther for Manager {
    async fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError> {
        Manager::authenticate(self, username, password).await
    }

    async fn authorize(
        &self,
        user: Option<&User>,
        topic: &str,
        permission: Permission,
    ) -> Result<(), AuthError> {
        Manager::authorize(self, user, topic, permission).await
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("default_access", &self.config.default_access)
            .field("max_connections", &self.config.max_connections)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Get current unix timestamp.
#[inline]
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub(super) async fn lookup_user_id<'e, E>(
    executor: E,
    username: &str,
) -> Result<Option<i64>, AuthError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> = sqlx::query_as(queries::SELECT_USER_ID)
        .bind(username)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(|(id,)| id))
}

/// SQLite has no boolean type; flags are stored as integers.
pub(super) fn flag(row: &SqliteRow, column: &str) -> Result<bool, AuthError> {
    Ok(row.try_get::<i64, _>(column)? != 0)
}

fn secs(row: &SqliteRow, column: &str) -> Result<Duration, AuthError> {
    Ok(Duration::from_secs(row.try_get::<i64, _>(column)?.max(0) as u64))
}

fn parse_user_row(row: &SqliteRow) -> Result<User, AuthError> {
    let name: String = row.try_get("name")?;
    let role: String = row.try_get("role")?;
    let settings: String = row.try_get("settings")?;
    let settings = serde_json::from_str(&settings).unwrap_or_else(|e| {
        warn!(user = %name, error = %e, "ignoring malformed user settings");
        Settings::default()
    });
    let tier = match row.try_get::<Option<String>, _>("plan_code")? {
        Some(_) => Some(parse_tier_row(row)?),
        None => None,
    };

    Ok(User {
        id: row.try_get("id")?,
        hash: row.try_get("password_hash")?,
        role: role.parse()?,
        stats: Stats {
            messages: row.try_get("messages")?,
            emails: row.try_get("emails")?,
            calls: row.try_get("calls")?,
        },
        tier,
        settings,
        token: None,
        created: row.try_get("created")?,
        name,
    })
}

pub(super) fn parse_tier_row(row: &SqliteRow) -> Result<Tier, AuthError> {
    Ok(Tier {
        code: row.try_get("plan_code")?,
        name: row.try_get("plan_name")?,
        messages_limit: row.try_get("messages_limit")?,
        messages_expiry_duration: secs(row, "messages_expiry_secs")?,
        emails_limit: row.try_get("emails_limit")?,
        calls_limit: row.try_get("calls_limit")?,
        reservations_limit: row.try_get("topics_limit")?,
        attachment_file_size_limit: row.try_get("attachment_file_size_limit")?,
        attachment_total_size_limit: row.try_get("attachment_total_size_limit")?,
        attachment_expiry_duration: secs(row, "attachment_expiry_secs")?,
    })
}

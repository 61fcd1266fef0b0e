//! Grants and topic reservations.

use sqlx::Row;
use tracing::info;

use crate::acl::TopicPattern;
use crate::error::AuthError;
use crate::permission::Permission;
use crate::user::{Grant, Reservation};
use crate::validate;

use super::manager::{EVERYONE_ID, Manager, flag, lookup_user_id};
use super::queries;

impl Manager {
    /// Grants of a user or Everyone, writable first.
    pub async fn grants(&self, username: &str) -> Result<Vec<Grant>, AuthError> {
        validate::principal(username)?;
        let user_id = self.user_id(username).await?;
        sqlx::query(queries::SELECT_USER_GRANTS)
            .bind(user_id)
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(|row| -> Result<Grant, AuthError> {
                Ok(Grant {
                    topic_pattern: row.try_get("topic_pattern")?,
                    permission: Permission::new(flag(row, "read")?, flag(row, "write")?),
                })
            })
            .collect()
    }

    /// Topics owned by a user, each with the access Everyone has on it.
    pub async fn reservations(&self, username: &str) -> Result<Vec<Reservation>, AuthError> {
        validate::username(username)?;
        let user_id = self.user_id(username).await?;
        sqlx::query(queries::SELECT_USER_RESERVATIONS)
            .bind(user_id)
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(|row| -> Result<Reservation, AuthError> {
                let everyone_read = row.try_get::<Option<i64>, _>("everyone_read")?;
                let everyone_write = row.try_get::<Option<i64>, _>("everyone_write")?;
                Ok(Reservation {
                    topic: row.try_get("topic_pattern")?,
                    owner: Permission::new(flag(row, "read")?, flag(row, "write")?),
                    everyone: Permission::new(
                        everyone_read.is_some_and(|v| v != 0),
                        everyone_write.is_some_and(|v| v != 0),
                    ),
                })
            })
            .collect()
    }

    /// Whether `username` owns `topic`.
    pub async fn has_reservation(&self, username: &str, topic: &str) -> Result<bool, AuthError> {
        validate::username(username)?;
        validate::topic(topic)?;
        let user_id = self.user_id(username).await?;
        let (count,): (i64,) = sqlx::query_as(queries::SELECT_USER_HAS_RESERVATION)
            .bind(user_id)
            .bind(topic)
            .fetch_one(self.pool())
            .await?;
        Ok(count > 0)
    }

    pub async fn reservations_count(&self, username: &str) -> Result<i64, AuthError> {
        validate::username(username)?;
        let user_id = self.user_id(username).await?;
        let (count,): (i64,) = sqlx::query_as(queries::SELECT_USER_RESERVATIONS_COUNT)
            .bind(user_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Name of the user that owns `topic`, if any.
    pub async fn reservation_owner(&self, topic: &str) -> Result<Option<String>, AuthError> {
        validate::topic(topic)?;
        let row: Option<(String,)> = sqlx::query_as(queries::SELECT_RESERVATION_OWNER)
            .bind(topic)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(name,)| name))
    }

    /// Fail with [`AuthError::TopicOwnedByOthers`] if `username` may not reserve `topic`.
    ///
    /// A topic is taken when a grant equal to it, or a pattern matching it, belongs to
    /// a different principal. A grant belongs to its owner, or to its own principal
    /// when it has no owner.
    pub async fn check_allow_access(&self, username: &str, topic: &str) -> Result<(), AuthError> {
        validate::username(username)?;
        validate::topic(topic)?;
        let user_id = self.user_id(username).await?;

        let patterns: Vec<(String,)> = sqlx::query_as(queries::SELECT_FOREIGN_PATTERNS)
            .bind(user_id)
            .fetch_all(self.pool())
            .await?;
        let taken = patterns
            .iter()
            .any(|(pattern,)| pattern == topic || TopicPattern::new(pattern).matches(topic));
        if taken {
            return Err(AuthError::TopicOwnedByOthers);
        }
        Ok(())
    }

    /// Grant `permission` on `topic_pattern` to a user or Everyone.
    ///
    /// Overwrites any existing grant for the same principal and pattern. `owner`
    /// marks the grant as part of that user's reservation.
    pub async fn allow_access(
        &self,
        owner: Option<&str>,
        username: &str,
        topic_pattern: &str,
        permission: Permission,
    ) -> Result<(), AuthError> {
        validate::principal(username)?;
        validate::topic_pattern(topic_pattern)?;
        if let Some(owner) = owner {
            validate::username(owner)?;
        }

        let mut tx = self.pool().begin().await?;
        let user_id = lookup_user_id(&mut *tx, username)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let owner_id = match owner {
            Some(owner) => Some(
                lookup_user_id(&mut *tx, owner)
                    .await?
                    .ok_or(AuthError::UserNotFound)?,
            ),
            None => None,
        };
        sqlx::query(queries::UPSERT_ACCESS)
            .bind(user_id)
            .bind(topic_pattern)
            .bind(permission.is_read())
            .bind(permission.is_write())
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            user = %username,
            topic = %topic_pattern,
            permission = %permission,
            "granted access"
        );
        Ok(())
    }

    /// Remove grants.
    ///
    /// * `(None, None)` removes every grant.
    /// * `(Some(user), None)` removes the user's grants and the grants it owns.
    /// * `(Some(user), Some(pattern))` removes one entry (and the entries the user owns on it).
    pub async fn reset_access(
        &self,
        username: Option<&str>,
        topic_pattern: Option<&str>,
    ) -> Result<(), AuthError> {
        match (username, topic_pattern) {
            (None, None) => {
                sqlx::query(queries::DELETE_ALL_ACCESS)
                    .execute(self.pool())
                    .await?;
                info!("reset all access");
            }
            (None, Some(_)) => {
                return Err(AuthError::invalid("topic pattern without username"));
            }
            (Some(username), None) => {
                validate::principal(username)?;
                let user_id = self.user_id(username).await?;
                sqlx::query(queries::DELETE_USER_ACCESS)
                    .bind(user_id)
                    .bind(user_id)
                    .execute(self.pool())
                    .await?;
                info!(user = %username, "reset access");
            }
            (Some(username), Some(pattern)) => {
                validate::principal(username)?;
                validate::topic_pattern(pattern)?;
                let user_id = self.user_id(username).await?;
                sqlx::query(queries::DELETE_TOPIC_ACCESS)
                    .bind(user_id)
                    .bind(user_id)
                    .bind(pattern)
                    .execute(self.pool())
                    .await?;
                info!(user = %username, topic = %pattern, "reset access");
            }
        }
        Ok(())
    }

    /// Reserve `topic` for `username` and set what Everyone may do on it.
    pub async fn add_reservation(
        &self,
        username: &str,
        topic: &str,
        everyone: Permission,
    ) -> Result<(), AuthError> {
        self.check_allow_access(username, topic).await?;

        let mut tx = self.pool().begin().await?;
        let user_id = lookup_user_id(&mut *tx, username)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        sqlx::query(queries::UPSERT_ACCESS)
            .bind(user_id)
            .bind(topic)
            .bind(true)
            .bind(true)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(queries::UPSERT_ACCESS)
            .bind(EVERYONE_ID)
            .bind(topic)
            .bind(everyone.is_read())
            .bind(everyone.is_write())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(user = %username, topic = %topic, everyone = %everyone, "added reservation");
        Ok(())
    }

    /// Drop reservations of `username` and every Everyone grant on those topics.
    pub async fn remove_reservations(
        &self,
        username: &str,
        topics: &[&str],
    ) -> Result<(), AuthError> {
        validate::username(username)?;
        for topic in topics {
            validate::topic(topic)?;
        }

        let mut tx = self.pool().begin().await?;
        let user_id = lookup_user_id(&mut *tx, username)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        for topic in topics {
            for id in [user_id, EVERYONE_ID] {
                sqlx::query(queries::DELETE_TOPIC_ACCESS)
                    .bind(id)
                    .bind(id)
                    .bind(*topic)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;

        info!(user = %username, count = topics.len(), "removed reservations");
        Ok(())
    }
}

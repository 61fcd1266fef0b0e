//! Tiers (plans) and user tier assignment.

use tracing::info;

use crate::error::{AuthError, is_unique_violation};
use crate::user::Tier;
use crate::validate;

use super::manager::{Manager, parse_tier_row};
use super::queries;

impl Manager {
    pub async fn add_tier(&self, tier: &Tier) -> Result<(), AuthError> {
        validate::tier_code(&tier.code)?;
        sqlx::query(queries::INSERT_TIER)
            .bind(&tier.code)
            .bind(&tier.name)
            .bind(tier.messages_limit)
            .bind(tier.messages_expiry_duration.as_secs() as i64)
            .bind(tier.emails_limit)
            .bind(tier.calls_limit)
            .bind(tier.reservations_limit)
            .bind(tier.attachment_file_size_limit)
            .bind(tier.attachment_total_size_limit)
            .bind(tier.attachment_expiry_duration.as_secs() as i64)
            .execute(self.pool())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AuthError::TierExists
                } else {
                    e.into()
                }
            })?;
        info!(tier = %tier.code, "added tier");
        Ok(())
    }

    /// Overwrite every limit of an existing tier, identified by code.
    pub async fn update_tier(&self, tier: &Tier) -> Result<(), AuthError> {
        validate::tier_code(&tier.code)?;
        let result = sqlx::query(queries::UPDATE_TIER)
            .bind(&tier.name)
            .bind(tier.messages_limit)
            .bind(tier.messages_expiry_duration.as_secs() as i64)
            .bind(tier.emails_limit)
            .bind(tier.calls_limit)
            .bind(tier.reservations_limit)
            .bind(tier.attachment_file_size_limit)
            .bind(tier.attachment_total_size_limit)
            .bind(tier.attachment_expiry_duration.as_secs() as i64)
            .bind(&tier.code)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::TierNotFound);
        }
        info!(tier = %tier.code, "updated tier");
        Ok(())
    }

    /// Delete a tier. Fails while users are still assigned to it.
    pub async fn remove_tier(&self, code: &str) -> Result<(), AuthError> {
        validate::tier_code(code)?;
        let mut tx = self.pool().begin().await?;
        let (assigned,): (i64,) = sqlx::query_as(queries::SELECT_TIER_USERS_COUNT)
            .bind(code)
            .fetch_one(&mut *tx)
            .await?;
        if assigned > 0 {
            return Err(AuthError::TierInUse);
        }
        let result = sqlx::query(queries::DELETE_TIER)
            .bind(code)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::TierNotFound);
        }
        tx.commit().await?;
        info!(tier = %code, "removed tier");
        Ok(())
    }

    pub async fn tiers(&self) -> Result<Vec<Tier>, AuthError> {
        sqlx::query(queries::SELECT_TIERS)
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(parse_tier_row)
            .collect()
    }

    pub async fn tier(&self, code: &str) -> Result<Tier, AuthError> {
        validate::tier_code(code)?;
        let row = sqlx::query(queries::SELECT_TIER_BY_CODE)
            .bind(code)
            .fetch_optional(self.pool())
            .await?
            .ok_or(AuthError::TierNotFound)?;
        parse_tier_row(&row)
    }

    /// Assign a tier to a user.
    pub async fn change_tier(&self, username: &str, code: &str) -> Result<(), AuthError> {
        validate::username(username)?;
        let tier = self.tier(code).await?;
        self.check_reservations_limit(username, tier.reservations_limit)
            .await?;

        let result = sqlx::query(queries::UPDATE_USER_PLAN)
            .bind(code)
            .bind(username)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        info!(user = %username, tier = %code, "changed tier");
        Ok(())
    }

    /// Remove the tier of a user.
    pub async fn reset_tier(&self, username: &str) -> Result<(), AuthError> {
        validate::username(username)?;
        self.check_reservations_limit(username, 0).await?;

        let result = sqlx::query(queries::RESET_USER_PLAN)
            .bind(username)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        info!(user = %username, "reset tier");
        Ok(())
    }

    /// On a downgrade, refuse when the user holds more reservations than `limit`.
    async fn check_reservations_limit(&self, username: &str, limit: i64) -> Result<(), AuthError> {
        let user = self.user(username).await?;
        let Some(current) = user.tier else {
            return Ok(());
        };
        if limit < current.reservations_limit && self.reservations_count(username).await? > limit {
            return Err(AuthError::TooManyReservations);
        }
        Ok(())
    }
}

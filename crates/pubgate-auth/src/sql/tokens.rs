//! Bearer token lifecycle.

use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use sqlx::Row;
use tracing::{debug, info};

use crate::error::AuthError;
use crate::user::{Token, User};
use crate::validate;

use super::manager::{Manager, now_unix};
use super::queries;

/// Length of every token, prefix included.
pub const TOKEN_LENGTH: usize = 32;

/// Prefix of every token.
pub const TOKEN_PREFIX: &str = "tk_";

/// Generate a random token.
pub fn generate_token() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH - TOKEN_PREFIX.len())
        .map(char::from)
        .collect();
    format!("{TOKEN_PREFIX}{suffix}")
}

/// Unix time `ttl` after `now`, saturating at `i64::MAX`.
fn expiry_after(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
}

impl Manager {
    fn token_expiry(&self) -> i64 {
        expiry_after(now_unix(), self.config().token_ttl)
    }

    /// Issue a new token for `user`.
    ///
    /// Only the newest `token_max_count` tokens of the user are kept.
    pub async fn create_token(&self, user: &User) -> Result<Token, AuthError> {
        if user.is_everyone() {
            return Err(AuthError::invalid("tokens cannot be issued to the anonymous user"));
        }
        let token = Token {
            value: generate_token(),
            expires: self.token_expiry(),
        };

        let mut tx = self.pool().begin().await?;
        sqlx::query(queries::INSERT_TOKEN)
            .bind(user.id)
            .bind(&token.value)
            .bind(token.expires)
            .execute(&mut *tx)
            .await?;
        let pruned = sqlx::query(queries::DELETE_EXCESS_TOKENS)
            .bind(user.id)
            .bind(user.id)
            .bind(i64::from(self.config().token_max_count))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if pruned > 0 {
            debug!(user = %user.name, pruned, "pruned excess tokens");
        }
        Ok(token)
    }

    /// Push the expiry of the token bound to `user` to now + TTL.
    pub async fn extend_token(&self, user: &User) -> Result<Token, AuthError> {
        let value = user.token.as_deref().ok_or(AuthError::NoTokenProvided)?;
        let expires = self.token_expiry();

        let result = sqlx::query(queries::UPDATE_TOKEN_EXPIRY)
            .bind(expires)
            .bind(user.id)
            .bind(value)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::TokenNotFound);
        }
        Ok(Token {
            value: value.to_string(),
            expires,
        })
    }

    /// Revoke the token bound to `user`.
    pub async fn remove_token(&self, user: &User) -> Result<(), AuthError> {
        let value = user.token.as_deref().ok_or(AuthError::Unauthorized)?;
        sqlx::query(queries::DELETE_TOKEN)
            .bind(user.id)
            .bind(value)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Delete all tokens that expired before now. Returns how many were removed.
    pub async fn remove_expired_tokens(&self) -> Result<u64, AuthError> {
        let removed = sqlx::query(queries::DELETE_EXPIRED_TOKENS)
            .bind(now_unix())
            .execute(self.pool())
            .await?
            .rows_affected();
        if removed > 0 {
            info!(removed, "removed expired tokens");
        }
        Ok(removed)
    }

    /// Tokens of a user, soonest expiry first. Expired but unswept tokens are included.
    pub async fn tokens(&self, username: &str) -> Result<Vec<Token>, AuthError> {
        validate::username(username)?;
        let user_id = self.user_id(username).await?;
        sqlx::query(queries::SELECT_TOKENS)
            .bind(user_id)
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(|row| -> Result<Token, AuthError> {
                Ok(Token {
                    value: row.try_get("token")?,
                    expires: row.try_get("expires")?,
                })
            })
            .collect()
    }
}

//! Authentication and authorization trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AuthError;
use crate::permission::Permission;
use crate::user::User;

/// The identity seam used by the transport layer.
///
/// Implementations must be thread-safe (`Send + Sync`) as they are called
/// concurrently from many request handlers.
#[async_trait]
pub trait Auther: Send + Sync {
    /// Check a username/password pair.
    ///
    /// # Returns
    /// * `Ok(User)` - the authenticated user
    /// * `Err(AuthError::Unauthenticated)` - bad credentials
    async fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError>;

    /// Check whether `user` (or the anonymous principal when `None`) may perform
    /// `permission` on `topic`.
    async fn authorize(
        &self,
        user: Option<&User>,
        topic: &str,
        permission: Permission,
    ) -> Result<(), AuthError>;
}

/// Blanket implementation for `Arc<A>` where `A: Auther`.
#[async_trait]
impl<A: Auther + ?Sized> Auther for Arc<A> {
    #[inline]
    async fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError> {
        (**self).authenticate(username, password).await
    }

    #[inline]
    async fn authorize(
        &self,
        user: Option<&User>,
        topic: &str,
        permission: Permission,
    ) -> Result<(), AuthError> {
        (**self).authorize(user, topic, permission).await
    }
}

/// Blanket implementation for `Box<A>` where `A: Auther`.
#[async_trait]
impl<A: Auther + ?Sized> Auther for Box<A> {
    #[inline]
    async fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError> {
        (**self).authenticate(username, password).await
    }

    #[inline]
    async fn authorize(
        &self,
        user: Option<&User>,
        topic: &str,
        permission: Permission,
    ) -> Result<(), AuthError> {
        (**self).authorize(user, topic, permission).await
    }
}

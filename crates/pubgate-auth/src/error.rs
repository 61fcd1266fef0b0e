//! Authentication and authorization error types.

/// Coarse classification of an [`AuthError`], used by the transport layer to pick a
/// protocol-level response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad credentials or token.
    Unauthenticated,
    /// Authenticated but not allowed, or a caller usage error.
    Unauthorized,
    /// Malformed username, topic, pattern, role or tier code.
    InvalidArgument,
    /// No such user, tier or token.
    NotFound,
    /// The request conflicts with existing state.
    Conflict,
    /// Unclassified store or hashing failure.
    Backend,
    /// The store cannot be used at all.
    Fatal,
}

/// Error returned by every manager operation.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Invalid username/password or token.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Insufficient permission.
    #[error("unauthorized")]
    Unauthorized,

    /// A token operation was requested for a user without a bound token.
    #[error("no token provided")]
    NoTokenProvided,

    /// Malformed input, detected before touching the store.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// User not found.
    #[error("user not found")]
    UserNotFound,

    /// Tier not found.
    #[error("tier not found")]
    TierNotFound,

    /// Token not found.
    #[error("token not found")]
    TokenNotFound,

    /// A user with that name already exists.
    #[error("user already exists")]
    UserExists,

    /// A tier with that code already exists.
    #[error("tier already exists")]
    TierExists,

    /// The tier is still assigned to at least one user.
    #[error("tier in use")]
    TierInUse,

    /// The topic (or an overlapping pattern) is owned by another user.
    #[error("topic owned by others")]
    TopicOwnedByOthers,

    /// The user holds more reservations than the requested tier allows.
    #[error("too many reservations")]
    TooManyReservations,

    /// Store error (database, I/O, constraint violation).
    #[error("backend error: {0}")]
    Backend(String),

    /// Password hashing failed.
    #[error("hash error: {0}")]
    Hash(String),

    /// The persisted schema is corrupt or from an unknown version.
    #[error("schema error: {0}")]
    Schema(String),
}

impl AuthError {
    /// Create a backend error from any error type.
    #[inline]
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    /// Create an invalid-argument error.
    #[inline]
    pub fn invalid(what: impl Into<String>) -> Self {
        Self::InvalidArgument(what.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::Unauthorized | Self::NoTokenProvided => ErrorKind::Unauthorized,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::UserNotFound | Self::TierNotFound | Self::TokenNotFound => ErrorKind::NotFound,
            Self::UserExists
            | Self::TierExists
            | Self::TierInUse
            | Self::TopicOwnedByOthers
            | Self::TooManyReservations => ErrorKind::Conflict,
            Self::Backend(_) | Self::Hash(_) => ErrorKind::Backend,
            Self::Schema(_) => ErrorKind::Fatal,
        }
    }
}

/// Whether a store error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(e) if e.is_unique_violation())
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        Self::backend(err)
    }
}

//! Error taxonomy shared by every auth flow.

use std::time::Duration;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed input, rejected before any state is touched.
    #[error("{0}")]
    Validation(String),

    /// Wrong email or password. Deliberately silent about which one.
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Please verify your email before logging in")]
    EmailNotVerified,

    #[error("Account temporarily locked")]
    AccountLocked { retry_after: Duration },

    #[error("Too many requests, please try again later")]
    RateLimited { retry_after: Duration },

    /// CSRF mismatch or acting on someone else's resource.
    #[error("Forbidden")]
    Forbidden,

    /// Unknown or expired verification/reset token.
    #[error("Invalid or expired token")]
    NotFound,

    #[error("Email already registered")]
    DuplicateEmail,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Seconds a client should wait before retrying, for throttling errors.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::AccountLocked { retry_after } | Self::RateLimited { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_only_for_throttling() {
        let locked = AuthError::AccountLocked {
            retry_after: Duration::from_secs(90),
        };
        assert_eq!(locked.retry_after(), Some(Duration::from_secs(90)));
        assert_eq!(AuthError::InvalidCredentials.retry_after(), None);
    }

    #[test]
    fn internal_errors_convert_from_anyhow() {
        let err: AuthError = anyhow::anyhow!("driver exploded").into();
        assert!(matches!(err, AuthError::Internal(_)));
    }
}

//! Double-submit CSRF protection.
//!
//! An anonymous session id travels in an `HttpOnly` cookie; the matching token is
//! handed out in a response body and must come back in a header on every mutating
//! request. The server keeps one grant per session id.

use std::{sync::Arc, time::Duration};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::error::{AuthError, AuthResult};
use super::utils::generate_token;
use crate::kv::KvStore;

pub const DEFAULT_GRANT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Clone, Debug)]
pub struct CsrfGrant {
    pub session_id: String,
    pub token: String,
}

pub struct CsrfGuard {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh token, reusing the caller's session id when it looks sane.
    /// Any previous token for that session id stops working.
    pub async fn issue(&self, session_id: Option<&str>) -> AuthResult<CsrfGrant> {
        let session_id = match session_id.filter(|id| is_valid_session_id(id)) {
            Some(id) => id.to_string(),
            None => generate_token()?,
        };
        let token = generate_token()?;
        self.kv.set(&grant_key(&session_id), &token, self.ttl).await?;
        Ok(CsrfGrant { session_id, token })
    }

    /// # Errors
    /// [`AuthError::Forbidden`] when either half is missing or they do not match the grant.
    pub async fn validate(&self, session_id: Option<&str>, token: Option<&str>) -> AuthResult<()> {
        let (Some(session_id), Some(token)) = (session_id, token) else {
            warn!("csrf token missing");
            return Err(AuthError::Forbidden);
        };
        if !is_valid_session_id(session_id) {
            warn!("csrf session id malformed");
            return Err(AuthError::Forbidden);
        }

        let stored = self.kv.get(&grant_key(session_id)).await?;
        match stored {
            Some(stored) if bool::from(stored.as_bytes().ct_eq(token.as_bytes())) => Ok(()),
            _ => {
                warn!("csrf token mismatch");
                Err(AuthError::Forbidden)
            }
        }
    }

    /// Push the grant's expiry out by a full TTL after it was used. Returns
    /// `false` when the grant is already gone.
    pub async fn touch(&self, session_id: &str) -> AuthResult<bool> {
        if !is_valid_session_id(session_id) {
            return Ok(false);
        }
        Ok(self.kv.expire(&grant_key(session_id), self.ttl).await?)
    }
}

fn grant_key(session_id: &str) -> String {
    format!("csrf:{session_id}")
}

fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use anyhow::Result;
    use tokio::time::advance;

    fn guard() -> CsrfGuard {
        CsrfGuard::new(Arc::new(MemoryKvStore::new()), DEFAULT_GRANT_TTL)
    }

    #[tokio::test]
    async fn issued_grant_validates() -> Result<()> {
        let guard = guard();
        let grant = guard.issue(None).await?;
        guard
            .validate(Some(&grant.session_id), Some(&grant.token))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn missing_or_mismatched_halves_are_forbidden() -> Result<()> {
        let guard = guard();
        let grant = guard.issue(None).await?;

        for (session_id, token) in [
            (None, Some(grant.token.as_str())),
            (Some(grant.session_id.as_str()), None),
            (Some(grant.session_id.as_str()), Some("forged")),
            (Some("other-session"), Some(grant.token.as_str())),
        ] {
            assert!(matches!(
                guard.validate(session_id, token).await,
                Err(AuthError::Forbidden)
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn reissue_rotates_token_for_same_session() -> Result<()> {
        let guard = guard();
        let first = guard.issue(None).await?;
        let second = guard.issue(Some(&first.session_id)).await?;

        assert_eq!(first.session_id, second.session_id);
        assert!(guard
            .validate(Some(&first.session_id), Some(&first.token))
            .await
            .is_err());
        guard
            .validate(Some(&second.session_id), Some(&second.token))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn malformed_session_id_gets_replaced() -> Result<()> {
        let grant = guard().issue(Some("bad id; injected")).await?;
        assert_ne!(grant.session_id, "bad id; injected");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn touch_slides_grant_expiry() -> Result<()> {
        let guard = guard();
        let grant = guard.issue(None).await?;
        let most_of_ttl = DEFAULT_GRANT_TTL - Duration::from_secs(60 * 60);

        advance(most_of_ttl).await;
        assert!(guard.touch(&grant.session_id).await?);
        advance(most_of_ttl).await;
        guard
            .validate(Some(&grant.session_id), Some(&grant.token))
            .await?;

        assert!(!guard.touch("unknown-session").await?);
        assert!(!guard.touch("bad id; injected").await?);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn grants_expire() -> Result<()> {
        let guard = guard();
        let grant = guard.issue(None).await?;
        advance(DEFAULT_GRANT_TTL + Duration::from_secs(1)).await;
        assert!(guard
            .validate(Some(&grant.session_id), Some(&grant.token))
            .await
            .is_err());
        Ok(())
    }
}

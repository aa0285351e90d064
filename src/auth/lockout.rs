//! Per-identifier brute-force protection.
//!
//! Failures are counted per email in the shared key-value store. Reaching the
//! threshold sets a lock that lasts for the lockout window; once the lock key
//! expires the counter is gone too, so the next attempt starts from zero.

use std::{sync::Arc, time::Duration};
use tracing::warn;

use super::error::{AuthError, AuthResult};
use crate::kv::KvStore;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOCKOUT_WINDOW: Duration = Duration::from_secs(15 * 60);

pub struct LoginGuard {
    kv: Arc<dyn KvStore>,
    max_attempts: u32,
    window: Duration,
}

impl LoginGuard {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, max_attempts: u32, window: Duration) -> Self {
        Self {
            kv,
            max_attempts: max_attempts.max(1),
            window,
        }
    }

    /// Fail fast while `identifier` is locked.
    ///
    /// # Errors
    /// [`AuthError::AccountLocked`] with the remaining wait.
    pub async fn check(&self, identifier: &str) -> AuthResult<()> {
        match self.kv.ttl(&lock_key(identifier)).await? {
            Some(retry_after) => {
                warn!(identifier, "login attempt on locked account");
                Err(AuthError::AccountLocked { retry_after })
            }
            None => Ok(()),
        }
    }

    /// Count a failed attempt. Returns `true` when this failure triggered the lock.
    pub async fn record_failure(&self, identifier: &str) -> AuthResult<bool> {
        let counter = self
            .kv
            .increment(&attempts_key(identifier), self.window)
            .await?;
        if counter.hits < u64::from(self.max_attempts) {
            return Ok(false);
        }

        self.kv
            .set(&lock_key(identifier), &counter.hits.to_string(), self.window)
            .await?;
        self.kv.delete(&attempts_key(identifier)).await?;
        warn!(
            identifier,
            attempts = counter.hits,
            "account locked due to failed attempts"
        );
        Ok(true)
    }

    /// A successful login wipes the failure history.
    pub async fn record_success(&self, identifier: &str) -> AuthResult<()> {
        self.kv.delete(&attempts_key(identifier)).await?;
        Ok(())
    }
}

fn attempts_key(identifier: &str) -> String {
    format!("lockout:attempts:{identifier}")
}

fn lock_key(identifier: &str) -> String {
    format!("lockout:until:{identifier}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use anyhow::Result;
    use tokio::time::advance;

    fn guard() -> LoginGuard {
        LoginGuard::new(
            Arc::new(MemoryKvStore::new()),
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_LOCKOUT_WINDOW,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn locks_after_threshold_and_releases_after_window() -> Result<()> {
        let guard = guard();
        for attempt in 1..=5 {
            guard.check("bob@x.com").await?;
            let locked = guard.record_failure("bob@x.com").await?;
            assert_eq!(locked, attempt == 5);
        }

        let Err(AuthError::AccountLocked { retry_after }) = guard.check("bob@x.com").await else {
            anyhow::bail!("expected lockout");
        };
        assert_eq!(retry_after, DEFAULT_LOCKOUT_WINDOW);

        advance(DEFAULT_LOCKOUT_WINDOW + Duration::from_secs(1)).await;
        guard.check("bob@x.com").await?;
        assert!(!guard.record_failure("bob@x.com").await?);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_counter() -> Result<()> {
        let guard = guard();
        for _ in 0..4 {
            guard.record_failure("carol@x.com").await?;
        }
        guard.record_success("carol@x.com").await?;
        for _ in 0..4 {
            assert!(!guard.record_failure("carol@x.com").await?);
        }
        guard.check("carol@x.com").await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn identifiers_are_isolated() -> Result<()> {
        let guard = guard();
        for _ in 0..5 {
            guard.record_failure("dave@x.com").await?;
        }
        assert!(guard.check("dave@x.com").await.is_err());
        guard.check("erin@x.com").await?;
        Ok(())
    }
}

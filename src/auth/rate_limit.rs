//! Request throttling per client and route, independent of login outcome.

use anyhow::Result;
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::warn;

use crate::kv::KvStore;

/// Named windows. Sensitive routes get tighter budgets than general traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// Signup, login, federated login.
    Auth,
    /// Resend verification, forgot password, reset password.
    Strict,
    General,
}

impl RateLimitTier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Strict => "strict",
            Self::General => "general",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub auth: RateLimitPolicy,
    pub strict: RateLimitPolicy,
    pub general: RateLimitPolicy,
}

impl RateLimitConfig {
    #[must_use]
    pub const fn policy(&self, tier: RateLimitTier) -> RateLimitPolicy {
        match tier {
            RateLimitTier::Auth => self.auth,
            RateLimitTier::Strict => self.strict,
            RateLimitTier::General => self.general,
        }
    }
}

impl Default for RateLimitConfig {
    /// auth: 10 per 15 minutes, strict: 3 per hour, general: 100 per 15 minutes.
    fn default() -> Self {
        Self {
            auth: RateLimitPolicy::new(10, Duration::from_secs(15 * 60)),
            strict: RateLimitPolicy::new(3, Duration::from_secs(60 * 60)),
            general: RateLimitPolicy::new(100, Duration::from_secs(15 * 60)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request from `client` on `route` against `tier`.
    async fn check(&self, tier: RateLimitTier, route: &str, client: &str)
        -> Result<RateLimitDecision>;
}

/// Fixed-window limiter over the shared key-value store.
pub struct KvRateLimiter {
    kv: Arc<dyn KvStore>,
    config: RateLimitConfig,
}

impl KvRateLimiter {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self { kv, config }
    }
}

#[async_trait]
impl RateLimiter for KvRateLimiter {
    async fn check(
        &self,
        tier: RateLimitTier,
        route: &str,
        client: &str,
    ) -> Result<RateLimitDecision> {
        let policy = self.config.policy(tier);
        let key = format!("ratelimit:{}:{route}:{client}", tier.as_str());
        let counter = self.kv.increment(&key, policy.window).await?;
        if counter.hits > u64::from(policy.max_requests) {
            warn!(
                tier = tier.as_str(),
                route,
                client,
                hits = counter.hits,
                "rate limit exceeded"
            );
            Ok(RateLimitDecision::Limited {
                retry_after: counter.ttl,
            })
        } else {
            Ok(RateLimitDecision::Allowed)
        }
    }
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn check(
        &self,
        _tier: RateLimitTier,
        _route: &str,
        _client: &str,
    ) -> Result<RateLimitDecision> {
        Ok(RateLimitDecision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use tokio::time::advance;

    fn limiter() -> KvRateLimiter {
        KvRateLimiter::new(Arc::new(MemoryKvStore::new()), RateLimitConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn strict_tier_allows_three_per_hour() -> Result<()> {
        let limiter = limiter();
        for _ in 0..3 {
            assert_eq!(
                limiter
                    .check(RateLimitTier::Strict, "/forgot-password", "1.2.3.4")
                    .await?,
                RateLimitDecision::Allowed
            );
        }

        advance(Duration::from_secs(10 * 60)).await;
        let decision = limiter
            .check(RateLimitTier::Strict, "/forgot-password", "1.2.3.4")
            .await?;
        assert_eq!(
            decision,
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs(50 * 60)
            }
        );

        advance(Duration::from_secs(50 * 60)).await;
        assert_eq!(
            limiter
                .check(RateLimitTier::Strict, "/forgot-password", "1.2.3.4")
                .await?,
            RateLimitDecision::Allowed
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn clients_and_routes_have_separate_windows() -> Result<()> {
        let limiter = limiter();
        for _ in 0..3 {
            limiter
                .check(RateLimitTier::Strict, "/reset-password", "a")
                .await?;
        }
        assert!(matches!(
            limiter
                .check(RateLimitTier::Strict, "/reset-password", "a")
                .await?,
            RateLimitDecision::Limited { .. }
        ));
        assert_eq!(
            limiter
                .check(RateLimitTier::Strict, "/reset-password", "b")
                .await?,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter
                .check(RateLimitTier::Strict, "/resend-verification", "a")
                .await?,
            RateLimitDecision::Allowed
        );
        Ok(())
    }

    #[tokio::test]
    async fn noop_rate_limiter_allows() -> Result<()> {
        let decision = NoopRateLimiter
            .check(RateLimitTier::Auth, "/login", "unknown")
            .await?;
        assert_eq!(decision, RateLimitDecision::Allowed);
        Ok(())
    }
}

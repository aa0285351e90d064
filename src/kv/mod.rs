//! Shared key-value state with per-key TTL.
//!
//! Lockout counters, CSRF grants, and rate-limit windows live behind [`KvStore`] so
//! several service instances can enforce the same limits. [`MemoryKvStore`] keeps the
//! state in-process for single-instance deployments and tests, [`PgKvStore`] shares it
//! through the `kv_entries` table.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

mod memory;
mod postgres;

pub use memory::MemoryKvStore;
pub use postgres::PgKvStore;

/// Result of bumping a fixed-window counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Counter {
    /// Hits recorded in the current window, including this one.
    pub hits: u64,
    /// Time left until the window resets.
    pub ttl: Duration,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Return the live value for `key`, or `None` when missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Atomically add one hit to the counter at `key`.
    ///
    /// The first hit of a window starts the TTL; later hits keep it, so the window
    /// is fixed rather than sliding.
    async fn increment(&self, key: &str, window: Duration) -> Result<Counter>;

    /// Reset the TTL of a live key. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining lifetime of a live key.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Drop every expired entry and return how many were removed.
    async fn purge_expired(&self) -> Result<u64>;

    /// Check the backing store is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{Counter, KvStore};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local store backed by a concurrent map.
///
/// Expiry is checked lazily on access and eagerly by [`KvStore::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .and_then(|entry| entry.is_live(now).then(|| entry.value.clone()));
        if live.is_none() {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        Ok(live)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<Counter> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: now + window,
        });
        if !entry.is_live(now) {
            entry.value = "0".to_string();
            entry.expires_at = now + window;
        }
        let hits = entry.value.parse::<u64>().unwrap_or(0).saturating_add(1);
        entry.value = hits.to_string();
        Ok(Counter {
            hits,
            ttl: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        Ok(self.entries.get(key).and_then(|entry| {
            entry
                .is_live(now)
                .then(|| entry.expires_at.saturating_duration_since(now))
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn set_get_and_expire() -> Result<()> {
        let store = MemoryKvStore::new();
        store.set("csrf:a", "token", Duration::from_secs(10)).await?;
        assert_eq!(store.get("csrf:a").await?.as_deref(), Some("token"));

        advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("csrf:a").await?, None);
        assert!(store.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn increment_uses_fixed_window() -> Result<()> {
        let store = MemoryKvStore::new();
        let window = Duration::from_secs(60);

        let first = store.increment("hits", window).await?;
        assert_eq!(first.hits, 1);
        assert_eq!(first.ttl, window);

        advance(Duration::from_secs(30)).await;
        let second = store.increment("hits", window).await?;
        assert_eq!(second.hits, 2);
        assert_eq!(second.ttl, Duration::from_secs(30));

        advance(Duration::from_secs(31)).await;
        let fresh = store.increment("hits", window).await?;
        assert_eq!(fresh.hits, 1);
        assert_eq!(fresh.ttl, window);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn expire_and_ttl_only_touch_live_keys() -> Result<()> {
        let store = MemoryKvStore::new();
        assert!(!store.expire("missing", Duration::from_secs(5)).await?);
        assert_eq!(store.ttl("missing").await?, None);

        store.set("k", "v", Duration::from_secs(5)).await?;
        assert!(store.expire("k", Duration::from_secs(50)).await?);
        assert_eq!(store.ttl("k").await?, Some(Duration::from_secs(50)));

        store.delete("k").await?;
        assert_eq!(store.get("k").await?, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_removes_stale_entries() -> Result<()> {
        let store = MemoryKvStore::new();
        store.set("short", "1", Duration::from_secs(1)).await?;
        store.set("long", "2", Duration::from_secs(100)).await?;

        advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await?, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("long").await?.as_deref(), Some("2"));
        Ok(())
    }
}

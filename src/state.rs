use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;

/// In-process key-value cache with per-entry expiry.
#[derive(Clone)]
pub struct TtlCache<V> {
    inner: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
}

#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

/// A live cache entry as seen by readers.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<V> {
    pub value: V,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl<V: Clone + Send + Sync> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store `value` under `key`. A zero `ttl` never expires. Returns
    /// whether the key was new.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) -> bool {
        let now = Utc::now();
        let expires_at = normalize_ttl(ttl, now);
        let entry = CacheEntry {
            value,
            stored_at: now,
            expires_at,
        };

        let key = key.into();
        let mut guard = self.inner.write().await;
        let created = guard.insert(key.clone(), entry).is_none();
        drop(guard);

        if let Some(expires_at) = expires_at {
            tracing::debug!(%key, %expires_at, "stored cache entry with ttl");
        }

        created
    }

    pub async fn get(&self, key: &str) -> Option<Cached<V>> {
        self.get_at(key, Utc::now()).await
    }

    async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Cached<V>> {
        {
            let guard = self.inner.read().await;
            match guard.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.as_cached()),
                Some(_) => {}
            }
        }

        // Expired: drop it unless a writer replaced it in the meantime.
        let mut guard = self.inner.write().await;
        if guard.get(key).is_some_and(|entry| entry.is_expired(now)) {
            guard.remove(key);
        }
        None
    }

    pub async fn purge(&self, keys: &[String]) -> usize {
        let mut guard = self.inner.write().await;
        let mut removed = 0;
        for key in keys {
            if guard.remove(key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub async fn purge_expired(&self) -> usize {
        let mut guard = self.inner.write().await;
        let now = Utc::now();
        let before = guard.len();
        guard.retain(|_, entry| !entry.is_expired(now));
        before - guard.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl<V: Clone + Send + Sync> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> CacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|deadline| deadline <= now).unwrap_or(false)
    }

    fn as_cached(&self) -> Cached<V> {
        Cached {
            value: self.value.clone(),
            stored_at: self.stored_at,
            expires_at: self.expires_at,
        }
    }
}

fn normalize_ttl(ttl: Duration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if ttl.is_zero() {
        return None;
    }

    let chrono_duration = match ChronoDuration::from_std(ttl) {
        Ok(value) => value,
        Err(_) => {
            const MAX_SECS: u64 = i64::MAX as u64 / 1000;
            let capped = ttl.as_secs().min(MAX_SECS);
            ChronoDuration::seconds(capped as i64)
        }
    };

    now.checked_add_signed(chrono_duration)
}

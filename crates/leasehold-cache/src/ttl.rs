//! Generic map with per-entry expiry.

use chrono::{DateTime, Utc};
use leasehold_core::clock::Clock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Mutex-guarded map whose entries expire after a TTL.
///
/// Expired entries are never returned, whether or not the sweeper has run yet.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = self
            .clock
            .now_utc()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries().insert(key, Entry { value, expires_at });
    }

    /// Remove and return a live entry.
    pub fn take(&self, key: &K) -> Option<V> {
        let now = self.clock.now_utc();
        let entry = self.entries().remove(key)?;
        (entry.expires_at > now).then_some(entry.value)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_utc();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep every `period` until `shutdown` flips to true.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        name: &'static str,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            info!(cache = name, period_secs = period.as_secs(), "Starting cache sweeper");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(cache = name, removed, "Swept expired entries");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!(cache = name, "Cache sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Return a live entry without removing it.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_utc();
        self.entries()
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasehold_core::clock::MockClock;

    fn cache() -> (Arc<MockClock>, TtlCache<String, u32>) {
        let clock = Arc::new(MockClock::from_rfc3339("2026-05-01T10:00:00Z"));
        (clock.clone(), TtlCache::new(clock))
    }

    #[test]
    fn test_expired_entries_are_hidden_before_sweep() {
        let (clock, cache) = cache();
        cache.insert("a".to_string(), 1, Duration::from_secs(10));
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        clock.advance(chrono::Duration::seconds(11));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.take(&"a".to_string()), None);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (clock, cache) = cache();
        cache.insert("short".to_string(), 1, Duration::from_secs(5));
        cache.insert("long".to_string(), 2, Duration::from_secs(60));

        clock.advance(chrono::Duration::seconds(6));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.get(&"long".to_string()), Some(2));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let (_clock, cache) = cache();
        let cache = Arc::new(cache);
        let (tx, rx) = watch::channel(false);
        let handle = cache.spawn_sweeper("test", Duration::from_millis(10), rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}

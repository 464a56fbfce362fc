//! One-time exchange of small payloads between an operator and a target.

use crate::ttl::TtlCache;
use leasehold_core::clock::Clock;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Longest time an entry may live.
pub const MAX_TTL: Duration = Duration::from_secs(30);

/// Default sweep period.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(5);

/// Read-once store: `take` consumes the entry, so it can be fetched at most once.
pub struct EphemeralExchange {
    cache: Arc<TtlCache<String, Vec<u8>>>,
    ttl: Duration,
}

impl EphemeralExchange {
    /// `ttl` is clamped to [`MAX_TTL`].
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            cache: Arc::new(TtlCache::new(clock)),
            ttl: ttl.min(MAX_TTL),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `bytes` under a fresh random 128-bit key.
    pub fn put(&self, bytes: Vec<u8>) -> String {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let key = hex::encode(raw);
        self.cache.insert(key.clone(), bytes, self.ttl);
        key
    }

    pub fn take(&self, key: &str) -> Option<Vec<u8>> {
        self.cache.take(&key.to_string())
    }

    pub fn sweep(&self) -> usize {
        self.cache.sweep()
    }

    pub fn spawn_sweeper(&self, period: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.cache.spawn_sweeper("exchange", period, shutdown)
    }
}

//! Cache of resolved SSH endpoints.

use crate::ttl::TtlCache;
use leasehold_core::clock::Clock;
use leasehold_core::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

pub const RESOLVE_TTL: Duration = Duration::from_secs(300);

pub struct ResolverCache {
    cache: Arc<TtlCache<(String, u16), SocketAddr>>,
}

impl ResolverCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Arc::new(TtlCache::new(clock)),
        }
    }

    /// Resolve `host:port`, reusing a lookup younger than [`RESOLVE_TTL`].
    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let key = (host.to_string(), port);
        if let Some(addr) = self.cache.get(&key) {
            return Ok(addr);
        }

        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::RemoteExecution(format!("cannot resolve {host}: {e}")))?
            .next()
            .ok_or_else(|| Error::RemoteExecution(format!("no address for {host}")))?;

        debug!(host, %addr, "Resolved host");
        self.cache.insert(key, addr, RESOLVE_TTL);
        Ok(addr)
    }

    /// Seed an entry, bypassing DNS.
    pub fn insert(&self, host: &str, port: u16, addr: SocketAddr) {
        self.cache.insert((host.to_string(), port), addr, RESOLVE_TTL);
    }

    pub fn spawn_sweeper(&self, period: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.cache.spawn_sweeper("resolver", period, shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasehold_core::clock::MockClock;

    #[tokio::test]
    async fn test_literal_address_resolves() {
        let resolver = ResolverCache::new(Arc::new(MockClock::from_rfc3339("2026-05-01T10:00:00Z")));
        let addr = resolver.resolve("127.0.0.1", 2222).await.unwrap();
        assert_eq!(addr, "127.0.0.1:2222".parse().unwrap());
    }

    #[tokio::test]
    async fn test_cached_entry_expires() {
        let clock = Arc::new(MockClock::from_rfc3339("2026-05-01T10:00:00Z"));
        let resolver = ResolverCache::new(clock.clone());
        let pinned: SocketAddr = "10.1.2.3:22".parse().unwrap();
        resolver.insert("edge.internal", 22, pinned);
        assert_eq!(resolver.resolve("edge.internal", 22).await.unwrap(), pinned);

        clock.advance(chrono::Duration::minutes(6));
        assert!(resolver.cache.get(&("edge.internal".to_string(), 22)).is_none());
    }
}

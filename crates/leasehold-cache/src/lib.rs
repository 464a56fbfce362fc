//! Short-lived in-memory caches for Leasehold.

pub mod exchange;
pub mod resolver;
pub mod ttl;

pub use exchange::EphemeralExchange;
pub use resolver::ResolverCache;
pub use ttl::TtlCache;

mod memory;

pub use memory::InMemoryResolver;

use crate::error::GatewayError;

/// Decomposes an inbound URL into an upstream base URL.
///
/// Resolution is synchronous and infallible-in-the-async-sense: the original
/// design keeps the routing table in memory, so there is no reason to make
/// callers await it. A `Resolver` is shared across every connection via an
/// `Arc`, so implementations must be `Send + Sync`.
pub trait Resolver: Send + Sync {
    /// Returns the upstream base URL (scheme + host + port, no trailing
    /// slash) for the service named in `url`, or a `GatewayError` describing
    /// why the URL could not be routed.
    fn resolve(&self, url: &str) -> Result<String, GatewayError>;
}

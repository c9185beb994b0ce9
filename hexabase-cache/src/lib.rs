//! Ephemeral, TTL-scoped state for the control plane. Everything here is
//! disposable: losing it degrades availability (a lease expires early, a
//! rate limit resets) but never corrupts the durable state owned by
//! `hexabase-hierarchy`/`hexabase-tasks`.

pub mod client;
pub mod error;
pub mod fingerprint;
pub mod jwks;
pub mod lease;
pub mod oidc_state;
pub mod rate_limit;
pub mod revocation;

#[cfg(test)]
test_r::enable!();

pub use client::{Cache, InMemoryCache, RedisCache};
pub use error::CacheError;

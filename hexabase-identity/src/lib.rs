//! Identity Broker (C4, spec §4.2): external OIDC login via PKCE, refresh
//! token rotation with family-based revocation, RS256 signing with key
//! rotation, and the short-lived internal JWTs the AIOps Authorization
//! Gateway (C9) uses to call into the rest of the control plane.

pub mod error;
pub mod jwt;
pub mod model;
pub mod oidc;
pub mod repo;
pub mod service;

#[cfg(test)]
test_r::enable!();

pub use error::IdentityError;
pub use jwt::{JwkEntry, Jwks, JwtError, KeyRing};
pub use oidc::{ExternalOidcProviders, ExternalProviderConfig, OidcClientError, OidcProviderRegistry};
pub use repo::{AuthTokenRepo, DbAuthTokenRepo, InMemoryAuthTokenRepo};
pub use service::{IdentityService, IdentityServiceDefault};

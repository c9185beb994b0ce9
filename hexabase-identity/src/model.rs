//! Identity data model (spec §3/§4.2): the durable refresh-token record
//! and the wire shape of the two JWT kinds this broker mints.

use chrono::{DateTime, Utc};
use hexabase_common::ids::{TokenFamilyId, TokenId, UserId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Refresh token entity (spec §3 `AuthToken`). The token handed to the
/// client is never stored as-is: only `secret_hash` (the random secret's
/// hash) and `fingerprint_hash` (the bound device/IP fingerprint) live
/// here. `secret_hash` is an addition the distilled entity list omits but
/// "Stored hashed" in the same paragraph requires at the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub id: TokenId,
    pub family_id: TokenFamilyId,
    pub user_id: UserId,
    pub secret_hash: String,
    pub fingerprint_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub revoked: bool,
}

/// `hash(device_id || client_ip_class)` (spec §4.2 "Algorithms").
pub fn compute_fingerprint(device_id: &str, client_ip_class: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update(b"|");
    hasher.update(client_ip_class.as_bytes());
    base64_url(&hasher.finalize())
}

pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    base64_url(&hasher.finalize())
}

fn base64_url(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The wire form of a refresh token: `{token_id}.{secret}`. The id lets the
/// repo be looked up by primary key instead of scanning for a hash match.
pub struct RefreshTokenWire {
    pub token_id: TokenId,
    pub secret: String,
}

impl RefreshTokenWire {
    pub fn encode(token_id: TokenId, secret: &str) -> String {
        format!("{token_id}.{secret}")
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (id_part, secret) = raw.split_once('.')?;
        let token_id: TokenId = id_part.parse().ok()?;
        Some(Self {
            token_id,
            secret: secret.to_string(),
        })
    }
}

/// One Organization membership as embedded in an access token (spec §4.2
/// token structure: `organizations:[{id,role}]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgClaim {
    pub id: String,
    pub role: String,
}

/// One Workspace membership as embedded in an access token (`workspaces:
/// [{id,roles[]}]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceClaim {
    pub id: String,
    pub roles: Vec<String>,
}

/// Access token claims (spec §4.2 "Token structure"). `groups` is the
/// transitive closure of the user's memberships within `aud`, recomputed
/// at issue time, never cached across a token's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub provider: String,
    pub organizations: Vec<OrgClaim>,
    pub workspaces: Vec<WorkspaceClaim>,
    pub groups: Vec<String>,
    pub fingerprint: String,
    pub sid: String,
    pub typ: String,
}

/// Scope narrowing carried by an internal JWT (spec §4.2 "AIOps sandbox").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalScope {
    pub org_id: Option<String>,
    pub workspace_id: Option<String>,
    pub project_id: Option<String>,
}

/// Internal JWT claims: `aud="hexabase-internal"`, TTL enforced by the
/// caller at mint time (`IssueInternalJWT(... ttl≤10s)`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalClaims {
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub scope: InternalScope,
    pub acting_for: String,
    pub typ: String,
}

/// Platform-wide audience used for a plain UI login (as opposed to a
/// Workspace-scoped audience minted for the vCluster OIDC exec plugin).
pub const PLATFORM_AUDIENCE: &str = "hexabase-platform";

pub const INTERNAL_AUDIENCE: &str = "hexabase-internal";

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn refresh_token_wire_round_trips() {
        let id = TokenId::generate();
        let wire = RefreshTokenWire::encode(id, "s3cr3t-abc");
        let parsed = RefreshTokenWire::parse(&wire).unwrap();
        assert_eq!(parsed.token_id, id);
        assert_eq!(parsed.secret, "s3cr3t-abc");
    }

    #[test]
    fn malformed_wire_token_is_rejected() {
        assert!(RefreshTokenWire::parse("not-a-valid-token").is_none());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = compute_fingerprint("device-1", "203.0.113.0/24");
        let b = compute_fingerprint("device-1", "203.0.113.0/24");
        let c = compute_fingerprint("device-2", "203.0.113.0/24");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

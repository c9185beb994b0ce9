//! Identity Broker service (C4, spec §4.2): external OIDC login, refresh
//! rotation, revocation, and the internal JWT AIOps uses to call into the
//! rest of the control plane.

use crate::error::IdentityError;
use crate::jwt::{JwkEntry, Jwks, KeyRing};
use crate::model::{
    compute_fingerprint, hash_secret, AccessTokenClaims, AuthToken, InternalClaims, InternalScope,
    OrgClaim, RefreshTokenWire, WorkspaceClaim, INTERNAL_AUDIENCE, PLATFORM_AUDIENCE,
};
use crate::oidc::ExternalOidcProviders;
use crate::repo::AuthTokenRepo;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use hexabase_bus::{Bus, Envelope, Topic};
use hexabase_cache::fingerprint::FingerprintStore;
use hexabase_cache::oidc_state::{OidcFlowState, OidcStateStore};
use hexabase_cache::rate_limit::{RateLimit, RateLimiter};
use hexabase_cache::revocation::RevocationStore;
use hexabase_common::ids::{TokenFamilyId, TokenId, UserId, WorkspaceId};
use hexabase_hierarchy::service::HierarchyServiceDefault;
use hexabase_hierarchy::HierarchyService;
use rand::distr::{Alphanumeric, SampleString};
use serde::Serialize;
use std::sync::Arc;

/// Access tokens minted for a plain platform login; short-lived per spec
/// §4.2, refreshed via the rotation flow rather than extended in place.
const ACCESS_TOKEN_TTL: Duration = Duration::hours(1);
/// Idle cap on a refresh token's family: the token handed back on each
/// rotation expires this far out, regardless of the family's original
/// issuance (spec §4.2 "refresh rotation").
const REFRESH_TOKEN_IDLE_TTL: Duration = Duration::days(7);
/// Hard ceiling the Async Task Engine's internal JWT may request (spec §4.2
/// "AIOps sandbox": "TTL ≤ 10s").
const INTERNAL_JWT_MAX_TTL: Duration = Duration::seconds(10);

fn random_secret() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 32)
}

pub struct BeginLoginResponse {
    pub auth_url: String,
    pub state: String,
}

pub struct LoginResult {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

pub struct UserInfoClaims {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn begin_external_login(
        &self,
        provider: &str,
        redirect_uri: &str,
    ) -> Result<BeginLoginResponse, IdentityError>;

    async fn complete_external_login(
        &self,
        provider: &str,
        code: &str,
        state: &str,
        client_ip: &str,
        device_id: &str,
    ) -> Result<LoginResult, IdentityError>;

    /// Rotates `refresh_token`. `old_access_token_jti` is the jti of the
    /// access token being replaced, if the caller has it, so it can be
    /// revoked for its remaining lifetime (spec §4.2 "refresh rotation").
    async fn refresh(
        &self,
        refresh_token: &str,
        client_ip: &str,
        device_id: &str,
        old_access_token_jti: Option<&str>,
    ) -> Result<LoginResult, IdentityError>;

    async fn revoke_refresh_token(&self, refresh_token: &str) -> Result<(), IdentityError>;
    async fn revoke_access_token(&self, jti: &str, remaining_ttl: std::time::Duration) -> Result<(), IdentityError>;

    async fn issue_internal_jwt(
        &self,
        user_id: UserId,
        scope: InternalScope,
        ttl: std::time::Duration,
    ) -> Result<String, IdentityError>;

    async fn verify_access_token(&self, token: &str, audience: &str) -> Result<AccessTokenClaims, IdentityError>;
    async fn verify_internal_jwt(&self, token: &str) -> Result<InternalClaims, IdentityError>;
    async fn user_info(&self, access_token: &str) -> Result<UserInfoClaims, IdentityError>;

    fn jwks(&self) -> Vec<JwkEntry>;
}

#[derive(Serialize)]
struct LoginNotification {
    user_id: String,
    provider: String,
}

pub struct IdentityServiceDefault {
    tokens: Arc<dyn AuthTokenRepo>,
    hierarchy: Arc<HierarchyServiceDefault>,
    providers: Arc<dyn ExternalOidcProviders>,
    keys: Arc<KeyRing>,
    bus: Arc<dyn Bus>,
    oidc_state: OidcStateStore,
    rate_limiter: RateLimiter,
    fingerprints: FingerprintStore,
    revocations: RevocationStore,
}

impl IdentityServiceDefault {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tokens: Arc<dyn AuthTokenRepo>,
        hierarchy: Arc<HierarchyServiceDefault>,
        providers: Arc<dyn ExternalOidcProviders>,
        keys: Arc<KeyRing>,
        bus: Arc<dyn Bus>,
        cache: Arc<dyn hexabase_cache::Cache>,
    ) -> Self {
        Self {
            tokens,
            hierarchy,
            providers,
            keys,
            bus,
            oidc_state: OidcStateStore::new(cache.clone()),
            rate_limiter: RateLimiter::new(cache.clone()),
            fingerprints: FingerprintStore::new(cache.clone()),
            revocations: RevocationStore::new(cache),
        }
    }

    async fn organizations_claim(&self, user_id: UserId) -> Result<Vec<OrgClaim>, IdentityError> {
        let memberships = self.hierarchy.list_organizations_for_user(user_id).await?;
        Ok(memberships
            .into_iter()
            .map(|m| OrgClaim { id: m.org_id.to_string(), role: format!("{:?}", m.role).to_lowercase() })
            .collect())
    }

    /// Workspace/group claims are only meaningful once a token is scoped to
    /// a specific Workspace (the vCluster OIDC exec plugin round trip); a
    /// plain platform-audience login carries empty vectors here instead.
    async fn workspace_scoped_claims(
        &self,
        user_id: UserId,
        workspace_id: Option<WorkspaceId>,
    ) -> Result<(Vec<WorkspaceClaim>, Vec<String>), IdentityError> {
        let Some(workspace_id) = workspace_id else {
            return Ok((Vec::new(), Vec::new()));
        };
        let effective_groups = self.hierarchy.resolve_effective_groups(user_id, workspace_id).await?;
        let bindings = self.hierarchy.resolve_bindings(workspace_id).await?;
        let roles: Vec<String> = bindings
            .iter()
            .filter(|b| effective_groups.contains(&b.group_id))
            .map(|b| b.role_id.to_string())
            .collect();
        let groups: Vec<String> = effective_groups.iter().map(|g| g.to_string()).collect();
        Ok((vec![WorkspaceClaim { id: workspace_id.to_string(), roles }], groups))
    }

    #[allow(clippy::too_many_arguments)]
    async fn mint_access_token(
        &self,
        user_id: UserId,
        email: &str,
        name: &str,
        picture: Option<String>,
        provider: &str,
        audience: &str,
        fingerprint: String,
        sid: String,
        workspace_id: Option<WorkspaceId>,
    ) -> Result<(String, i64), IdentityError> {
        let organizations = self.organizations_claim(user_id).await?;
        let (workspaces, groups) = self.workspace_scoped_claims(user_id, workspace_id).await?;
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            picture,
            iss: "https://identity.hexabase".to_string(),
            aud: audience.to_string(),
            iat: now.timestamp(),
            exp: (now + ACCESS_TOKEN_TTL).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            organizations,
            workspaces,
            groups,
            fingerprint,
            sid,
            typ: "access".to_string(),
        };
        let token = self.keys.sign(&claims).map_err(|e| IdentityError::Jwt(e.to_string()))?;
        Ok((token, ACCESS_TOKEN_TTL.num_seconds()))
    }

    /// All-in-memory broker for other crates' tests (`hexabase-aiops`)
    /// that need a real [`IdentityService`] to mint/verify internal JWTs
    /// without standing up Postgres/Redis or a real external IdP. Not
    /// `#[cfg(test)]`: downstream crates only see this module through its
    /// published API, so the gate would hide it from them.
    pub fn test_default() -> Self {
        let hierarchy = Arc::new(HierarchyServiceDefault::new(
            Arc::new(hexabase_hierarchy::repo::InMemoryOrganizationRepo::new()),
            Arc::new(hexabase_hierarchy::repo::InMemoryUserRepo::new()),
            Arc::new(hexabase_hierarchy::repo::InMemoryOrganizationUserRepo::new()),
            Arc::new(hexabase_hierarchy::repo::InMemoryWorkspaceRepo::new()),
            Arc::new(hexabase_hierarchy::repo::InMemoryPlanRepo::new()),
            Arc::new(hexabase_hierarchy::repo::InMemoryProjectRepo::new()),
            Arc::new(hexabase_hierarchy::repo::InMemoryGroupRepo::new()),
            Arc::new(hexabase_hierarchy::repo::InMemoryRoleRepo::new()),
            Arc::new(hexabase_hierarchy::repo::InMemoryRoleAssignmentRepo::new()),
            Arc::new(hexabase_hierarchy::audit::InMemoryAuditSink::new()),
            Arc::new(hexabase_bus::InMemoryBus::new()),
        ));
        Self::new(
            Arc::new(crate::repo::InMemoryAuthTokenRepo::new()),
            hierarchy,
            Arc::new(crate::oidc::OidcProviderRegistry::new(std::collections::HashMap::new())),
            Arc::new(KeyRing::generate().expect("RSA keygen")),
            Arc::new(hexabase_bus::InMemoryBus::new()),
            Arc::new(hexabase_cache::InMemoryCache::new()),
        )
    }

    async fn issue_refresh_token(&self, user_id: UserId, family_id: TokenFamilyId, fingerprint_hash: String) -> Result<String, IdentityError> {
        let secret = random_secret();
        let now = Utc::now();
        let token = AuthToken {
            id: TokenId::generate(),
            family_id,
            user_id,
            secret_hash: hash_secret(&secret),
            fingerprint_hash,
            issued_at: now,
            expires_at: now + REFRESH_TOKEN_IDLE_TTL,
            consumed: false,
            revoked: false,
        };
        self.tokens.insert(&token).await.map_err(IdentityError::Repo)?;
        Ok(RefreshTokenWire::encode(token.id, &secret))
    }
}

#[async_trait]
impl IdentityService for IdentityServiceDefault {
    async fn begin_external_login(
        &self,
        provider: &str,
        redirect_uri: &str,
    ) -> Result<BeginLoginResponse, IdentityError> {
        let result = self
            .providers
            .begin_login(provider, redirect_uri)
            .await
            .map_err(|e| IdentityError::ProviderError(e.to_string()))?;

        let flow = OidcFlowState {
            pkce_verifier: result.pkce_verifier,
            nonce: result.nonce,
            redirect_uri: redirect_uri.to_string(),
            requested_at_unix: Utc::now().timestamp(),
            audience: PLATFORM_AUDIENCE.to_string(),
        };
        self.oidc_state.put(&result.state, &flow).await.map_err(IdentityError::Cache)?;

        Ok(BeginLoginResponse { auth_url: result.auth_url.to_string(), state: result.state })
    }

    async fn complete_external_login(
        &self,
        provider: &str,
        code: &str,
        state: &str,
        client_ip: &str,
        device_id: &str,
    ) -> Result<LoginResult, IdentityError> {
        if !self.rate_limiter.check("login", client_ip, &RateLimit::LOGIN_PER_IP).await.map_err(IdentityError::Cache)? {
            return Err(IdentityError::RateLimitExceeded);
        }

        let flow = self
            .oidc_state
            .take(state)
            .await
            .map_err(IdentityError::Cache)?
            .ok_or_else(|| IdentityError::InvalidGrant("unknown or already-consumed state".to_string()))?;

        let identity = self
            .providers
            .complete_login(provider, code, &flow.pkce_verifier, &flow.nonce)
            .await
            .map_err(|e| IdentityError::ProviderError(e.to_string()))?;

        let user = self
            .hierarchy
            .get_or_create_user(identity.external_subject, provider.to_string(), identity.email.clone(), identity.display_name.clone())
            .await?;

        if self.hierarchy.list_organizations_for_user(user.id).await?.is_empty() {
            self.hierarchy
                .create_organization(format!("{}-personal", user.display_name.to_lowercase()), user.id)
                .await?;
        }

        let fingerprint = compute_fingerprint(device_id, client_ip);
        let sid = uuid::Uuid::new_v4().to_string();
        self.fingerprints
            .bind(&sid, &fingerprint, REFRESH_TOKEN_IDLE_TTL.to_std().expect("positive duration"))
            .await
            .map_err(IdentityError::Cache)?;

        let (access_token, expires_in) = self
            .mint_access_token(user.id, &identity.email, &identity.display_name, identity.picture, provider, PLATFORM_AUDIENCE, fingerprint.clone(), sid, None)
            .await?;

        let refresh_token = self
            .issue_refresh_token(user.id, TokenFamilyId::generate(), hash_secret(&fingerprint))
            .await?;

        tracing::info!(user_id = %user.id, provider, "external login completed");
        let notification = LoginNotification { user_id: user.id.to_string(), provider: provider.to_string() };
        let envelope = Envelope::new("user_login", &notification, Utc::now().timestamp());
        let _ = self.bus.publish(Topic::UserNotification, envelope).await;

        Ok(LoginResult { access_token, refresh_token, expires_in })
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        client_ip: &str,
        device_id: &str,
        old_access_token_jti: Option<&str>,
    ) -> Result<LoginResult, IdentityError> {
        let wire = RefreshTokenWire::parse(refresh_token)
            .ok_or_else(|| IdentityError::InvalidGrant("malformed refresh token".to_string()))?;

        if !self
            .rate_limiter
            .check("refresh", &wire.token_id.to_string(), &RateLimit::REFRESH_PER_USER)
            .await
            .map_err(IdentityError::Cache)?
        {
            return Err(IdentityError::RateLimitExceeded);
        }

        let token = self.tokens.get(wire.token_id).await.map_err(IdentityError::Repo)?.ok_or(IdentityError::TokenExpired)?;

        if token.secret_hash != hash_secret(&wire.secret) {
            return Err(IdentityError::InvalidGrant("refresh token secret mismatch".to_string()));
        }
        if token.expires_at <= Utc::now() {
            return Err(IdentityError::TokenExpired);
        }
        if token.revoked || self.tokens.is_family_revoked(token.family_id).await.map_err(IdentityError::Repo)? {
            return Err(IdentityError::TokenRevoked);
        }

        let fingerprint = compute_fingerprint(device_id, client_ip);
        if token.fingerprint_hash != hash_secret(&fingerprint) {
            return Err(IdentityError::FingerprintMismatch);
        }

        // Two concurrent rotations of the same token must not both succeed;
        // the loser observes `consumed` already set and is treated as reuse
        // of an already-rotated token, which revokes the whole family.
        if !self.tokens.try_consume(token.id).await.map_err(IdentityError::Repo)? {
            tracing::warn!(family_id = %token.family_id, "refresh token reuse detected, revoking family");
            self.tokens
                .revoke_family(token.family_id)
                .await
                .map_err(IdentityError::Repo)?;
            self.revocations
                .revoke_family(&token.family_id.to_string(), std::time::Duration::from_secs(3600))
                .await
                .map_err(IdentityError::Cache)?;
            return Err(IdentityError::TokenRevoked);
        }

        if let Some(jti) = old_access_token_jti {
            self.revocations
                .revoke_jti(jti, ACCESS_TOKEN_TTL.to_std().expect("positive duration"))
                .await
                .map_err(IdentityError::Cache)?;
        }

        let user = self
            .hierarchy
            .get_user(token.user_id)
            .await?
            .ok_or_else(|| IdentityError::NotFound(format!("user {}", token.user_id)))?;

        let sid = uuid::Uuid::new_v4().to_string();
        let (access_token, expires_in) = self
            .mint_access_token(
                token.user_id,
                &user.email,
                &user.display_name,
                None,
                &user.provider,
                PLATFORM_AUDIENCE,
                fingerprint.clone(),
                sid,
                None,
            )
            .await?;

        let new_refresh_token = self
            .issue_refresh_token(token.user_id, token.family_id, hash_secret(&fingerprint))
            .await?;

        Ok(LoginResult { access_token, refresh_token: new_refresh_token, expires_in })
    }

    async fn revoke_refresh_token(&self, refresh_token: &str) -> Result<(), IdentityError> {
        let wire = RefreshTokenWire::parse(refresh_token)
            .ok_or_else(|| IdentityError::InvalidGrant("malformed refresh token".to_string()))?;
        let token = self.tokens.get(wire.token_id).await.map_err(IdentityError::Repo)?.ok_or(IdentityError::TokenExpired)?;
        self.tokens.revoke_family(token.family_id).await.map_err(IdentityError::Repo)?;
        self.revocations
            .revoke_family(&token.family_id.to_string(), std::time::Duration::from_secs(3600))
            .await
            .map_err(IdentityError::Cache)?;
        Ok(())
    }

    async fn revoke_access_token(&self, jti: &str, remaining_ttl: std::time::Duration) -> Result<(), IdentityError> {
        self.revocations.revoke_jti(jti, remaining_ttl).await.map_err(IdentityError::Cache)
    }

    async fn issue_internal_jwt(
        &self,
        user_id: UserId,
        scope: InternalScope,
        ttl: std::time::Duration,
    ) -> Result<String, IdentityError> {
        let ttl = Duration::from_std(ttl).unwrap_or(INTERNAL_JWT_MAX_TTL).min(INTERNAL_JWT_MAX_TTL);
        let now = Utc::now();
        let claims = InternalClaims {
            sub: user_id.to_string(),
            aud: INTERNAL_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            scope,
            acting_for: user_id.to_string(),
            typ: "internal".to_string(),
        };
        self.keys.sign(&claims).map_err(|e| IdentityError::Jwt(e.to_string()))
    }

    async fn verify_access_token(&self, token: &str, audience: &str) -> Result<AccessTokenClaims, IdentityError> {
        let claims: AccessTokenClaims = self.keys.verify(token, audience).map_err(|e| match e {
            crate::jwt::JwtError::Expired => IdentityError::TokenExpired,
            _ => IdentityError::Jwt(e.to_string()),
        })?;
        if self.revocations.is_jti_revoked(&claims.jti).await.map_err(IdentityError::Cache)? {
            return Err(IdentityError::TokenRevoked);
        }
        Ok(claims)
    }

    async fn verify_internal_jwt(&self, token: &str) -> Result<InternalClaims, IdentityError> {
        let claims: InternalClaims = self.keys.verify(token, INTERNAL_AUDIENCE).map_err(|e| match e {
            crate::jwt::JwtError::Expired => IdentityError::TokenExpired,
            _ => IdentityError::Jwt(e.to_string()),
        })?;
        if self.revocations.is_jti_revoked(&claims.jti).await.map_err(IdentityError::Cache)? {
            return Err(IdentityError::TokenRevoked);
        }
        Ok(claims)
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfoClaims, IdentityError> {
        let claims = self.verify_access_token(access_token, PLATFORM_AUDIENCE).await?;
        Ok(UserInfoClaims { sub: claims.sub, email: claims.email, name: claims.name, picture: claims.picture })
    }

    fn jwks(&self) -> Vec<JwkEntry> {
        let Jwks { keys } = self.keys.jwks();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::{BeginLoginResult, ExternalIdentity, OidcClientError};
    use hexabase_bus::InMemoryBus;
    use hexabase_cache::InMemoryCache;
    use hexabase_hierarchy::audit::InMemoryAuditSink;
    use hexabase_hierarchy::repo::{
        InMemoryGroupRepo, InMemoryOrganizationRepo, InMemoryOrganizationUserRepo, InMemoryPlanRepo,
        InMemoryProjectRepo, InMemoryRoleAssignmentRepo, InMemoryRoleRepo, InMemoryUserRepo, InMemoryWorkspaceRepo,
    };
    use std::sync::Mutex;
    use test_r::test;

    /// A fake external IdP that always resolves the same external subject,
    /// so tests can drive `complete_external_login` without a real network
    /// round trip.
    struct FakeProvider {
        subject: Mutex<u32>,
    }

    #[async_trait]
    impl ExternalOidcProviders for FakeProvider {
        async fn begin_login(&self, _provider: &str, redirect_uri: &str) -> Result<BeginLoginResult, OidcClientError> {
            Ok(BeginLoginResult {
                auth_url: url::Url::parse(redirect_uri).unwrap(),
                state: "test-state".to_string(),
                pkce_verifier: "verifier".to_string(),
                nonce: "nonce".to_string(),
            })
        }

        async fn complete_login(
            &self,
            _provider: &str,
            _code: &str,
            _pkce_verifier: &str,
            _expected_nonce: &str,
        ) -> Result<ExternalIdentity, OidcClientError> {
            let subject = *self.subject.lock().unwrap();
            Ok(ExternalIdentity {
                external_subject: format!("sub-{subject}"),
                email: format!("user{subject}@example.com"),
                display_name: format!("User {subject}"),
                picture: None,
            })
        }
    }

    fn service() -> IdentityServiceDefault {
        let plans = Arc::new(InMemoryPlanRepo::new());
        let hierarchy = Arc::new(HierarchyServiceDefault::new(
            Arc::new(InMemoryOrganizationRepo::new()),
            Arc::new(InMemoryUserRepo::new()),
            Arc::new(InMemoryOrganizationUserRepo::new()),
            Arc::new(InMemoryWorkspaceRepo::new()),
            plans,
            Arc::new(InMemoryProjectRepo::new()),
            Arc::new(InMemoryGroupRepo::new()),
            Arc::new(InMemoryRoleRepo::new()),
            Arc::new(InMemoryRoleAssignmentRepo::new()),
            Arc::new(InMemoryAuditSink::new()),
            Arc::new(InMemoryBus::new()),
        ));

        IdentityServiceDefault::new(
            Arc::new(crate::repo::InMemoryAuthTokenRepo::new()),
            hierarchy,
            Arc::new(FakeProvider { subject: Mutex::new(1) }),
            Arc::new(KeyRing::generate().unwrap()),
            Arc::new(InMemoryBus::new()),
            Arc::new(InMemoryCache::new()),
        )
    }

    #[test]
    async fn complete_login_issues_tokens_and_creates_a_personal_org() {
        let svc = service();
        let begin = svc.begin_external_login("google", "https://app.example/callback").await.unwrap();

        let result = svc
            .complete_external_login("google", "auth-code", &begin.state, "203.0.113.0/24", "device-1")
            .await
            .unwrap();

        assert!(!result.access_token.is_empty());
        assert!(!result.refresh_token.is_empty());
        assert_eq!(result.expires_in, ACCESS_TOKEN_TTL.num_seconds());

        let claims = svc.verify_access_token(&result.access_token, PLATFORM_AUDIENCE).await.unwrap();
        assert_eq!(claims.organizations.len(), 1);
    }

    #[test]
    async fn complete_login_twice_with_same_state_fails_the_second_time() {
        let svc = service();
        let begin = svc.begin_external_login("google", "https://app.example/callback").await.unwrap();

        svc.complete_external_login("google", "auth-code", &begin.state, "203.0.113.0/24", "device-1")
            .await
            .unwrap();

        let replay = svc
            .complete_external_login("google", "auth-code", &begin.state, "203.0.113.0/24", "device-1")
            .await;
        assert!(matches!(replay, Err(IdentityError::InvalidGrant(_))));
    }

    #[test]
    async fn refresh_rotates_the_token_and_rejects_reuse_of_the_old_one() {
        let svc = service();
        let begin = svc.begin_external_login("google", "https://app.example/callback").await.unwrap();
        let login = svc
            .complete_external_login("google", "auth-code", &begin.state, "203.0.113.0/24", "device-1")
            .await
            .unwrap();

        let rotated = svc.refresh(&login.refresh_token, "203.0.113.0/24", "device-1", None).await.unwrap();
        assert_ne!(rotated.refresh_token, login.refresh_token);

        // presenting the now-consumed original refresh token again must
        // revoke the whole family, not just fail quietly.
        let reuse = svc.refresh(&login.refresh_token, "203.0.113.0/24", "device-1", None).await;
        assert!(matches!(reuse, Err(IdentityError::TokenRevoked)));

        // the freshly-rotated token the caller actually holds is also dead now.
        let after_family_revoke = svc.refresh(&rotated.refresh_token, "203.0.113.0/24", "device-1", None).await;
        assert!(matches!(after_family_revoke, Err(IdentityError::TokenRevoked)));
    }

    #[test]
    async fn refresh_rejects_fingerprint_mismatch_without_consuming_the_token() {
        let svc = service();
        let begin = svc.begin_external_login("google", "https://app.example/callback").await.unwrap();
        let login = svc
            .complete_external_login("google", "auth-code", &begin.state, "203.0.113.0/24", "device-1")
            .await
            .unwrap();

        let mismatched = svc.refresh(&login.refresh_token, "198.51.100.0/24", "device-1", None).await;
        assert!(matches!(mismatched, Err(IdentityError::FingerprintMismatch)));

        // the token is still usable from the original device/IP.
        let ok = svc.refresh(&login.refresh_token, "203.0.113.0/24", "device-1", None).await;
        assert!(ok.is_ok());
    }

    #[test]
    async fn revoke_refresh_token_blocks_further_rotation() {
        let svc = service();
        let begin = svc.begin_external_login("google", "https://app.example/callback").await.unwrap();
        let login = svc
            .complete_external_login("google", "auth-code", &begin.state, "203.0.113.0/24", "device-1")
            .await
            .unwrap();

        svc.revoke_refresh_token(&login.refresh_token).await.unwrap();
        let refreshed = svc.refresh(&login.refresh_token, "203.0.113.0/24", "device-1", None).await;
        assert!(matches!(refreshed, Err(IdentityError::TokenRevoked)));
    }

    #[test]
    async fn internal_jwt_caps_ttl_at_ten_seconds_and_verifies() {
        let svc = service();
        let scope = InternalScope { org_id: None, workspace_id: None, project_id: None };
        let token = svc
            .issue_internal_jwt(UserId::generate(), scope, std::time::Duration::from_secs(3600))
            .await
            .unwrap();

        let claims = svc.verify_internal_jwt(&token).await.unwrap();
        assert!(claims.exp - claims.iat <= INTERNAL_JWT_MAX_TTL.num_seconds());
    }
}

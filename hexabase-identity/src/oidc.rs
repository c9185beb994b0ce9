//! External OIDC login (spec §4.2): the broker is itself an OIDC *relying
//! party* toward Google/GitHub/Azure, using authorization-code + PKCE.
//! (Acting *as* an OIDC provider toward vClusters is `crate::provider`.)

use async_trait::async_trait;
use openidconnect::core::{CoreClient, CoreProviderMetadata, CoreResponseType};
use openidconnect::reqwest::async_http_client;
use openidconnect::{
    AuthenticationFlow, AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce,
    OAuth2TokenResponse, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope,
};
use std::collections::HashMap;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum OidcClientError {
    #[error("unknown external provider: {0}")]
    UnknownProvider(String),
    #[error("provider discovery or token exchange failed: {0}")]
    Upstream(String),
}

#[derive(Clone, Debug)]
pub struct ExternalProviderConfig {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// External identity claims recovered from the provider's ID token
/// (spec §3 `User`: `external_subject, provider, email, display_name`).
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    pub external_subject: String,
    pub email: String,
    pub display_name: String,
    pub picture: Option<String>,
}

pub struct BeginLoginResult {
    pub auth_url: Url,
    pub state: String,
    pub pkce_verifier: String,
    pub nonce: String,
}

/// One external provider's resolved OIDC client plus the registry of all
/// configured providers, keyed by the provider name path-segment
/// (`/auth/login/{provider}`).
#[async_trait]
pub trait ExternalOidcProviders: Send + Sync {
    async fn begin_login(&self, provider: &str, redirect_uri: &str) -> Result<BeginLoginResult, OidcClientError>;

    async fn complete_login(
        &self,
        provider: &str,
        code: &str,
        pkce_verifier: &str,
        expected_nonce: &str,
    ) -> Result<ExternalIdentity, OidcClientError>;
}

pub struct OidcProviderRegistry {
    configs: HashMap<String, ExternalProviderConfig>,
}

impl OidcProviderRegistry {
    pub fn new(configs: HashMap<String, ExternalProviderConfig>) -> Self {
        Self { configs }
    }

    async fn client_for(&self, provider: &str, redirect_uri: &str) -> Result<CoreClient, OidcClientError> {
        let config = self
            .configs
            .get(provider)
            .ok_or_else(|| OidcClientError::UnknownProvider(provider.to_string()))?;

        let issuer_url =
            IssuerUrl::new(config.issuer_url.clone()).map_err(|e| OidcClientError::Upstream(e.to_string()))?;
        let metadata = CoreProviderMetadata::discover_async(issuer_url, async_http_client)
            .await
            .map_err(|e| OidcClientError::Upstream(e.to_string()))?;

        let redirect_url =
            RedirectUrl::new(redirect_uri.to_string()).map_err(|e| OidcClientError::Upstream(e.to_string()))?;

        Ok(CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
        )
        .set_redirect_uri(redirect_url))
    }
}

#[async_trait]
impl ExternalOidcProviders for OidcProviderRegistry {
    async fn begin_login(&self, provider: &str, redirect_uri: &str) -> Result<BeginLoginResult, OidcClientError> {
        let client = self.client_for(provider, redirect_uri).await?;

        // spec §4.2 "PKCE": S256 only, verifier 43-128 base64url chars —
        // `PkceCodeChallenge::new_random_sha256` produces exactly that.
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, csrf_token, nonce) = client
            .authorize_url(
                AuthenticationFlow::<CoreResponseType>::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .add_scope(Scope::new("email".to_string()))
            .add_scope(Scope::new("profile".to_string()))
            .set_pkce_challenge(pkce_challenge)
            .url();

        Ok(BeginLoginResult {
            auth_url,
            state: csrf_token.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
            nonce: nonce.secret().clone(),
        })
    }

    async fn complete_login(
        &self,
        provider: &str,
        code: &str,
        pkce_verifier: &str,
        expected_nonce: &str,
    ) -> Result<ExternalIdentity, OidcClientError> {
        // The redirect URI only matters for the authorize step; the token
        // exchange below re-sends whatever was registered on `client_for`,
        // so any placeholder redirect is fine to rebuild the client here.
        let client = self.client_for(provider, "urn:hexabase:token-exchange").await?;

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| OidcClientError::Upstream(e.to_string()))?;

        let id_token = token_response
            .extra_fields()
            .id_token()
            .ok_or_else(|| OidcClientError::Upstream("provider response carried no id_token".to_string()))?;
        let expected_nonce = Nonce::new(expected_nonce.to_string());
        let claims = id_token
            .claims(&client.id_token_verifier(), &expected_nonce)
            .map_err(|e| OidcClientError::Upstream(e.to_string()))?;

        Ok(ExternalIdentity {
            external_subject: claims.subject().to_string(),
            email: claims
                .email()
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("{}@{}", claims.subject().as_str(), provider)),
            display_name: claims
                .name()
                .and_then(|n| n.get(None))
                .map(|n| n.to_string())
                .unwrap_or_else(|| claims.subject().to_string()),
            picture: claims.picture().and_then(|p| p.get(None)).map(|p| p.to_string()),
        })
    }
}
